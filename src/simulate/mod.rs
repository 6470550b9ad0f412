//! Simulated user interaction: input events and scripted dialogs.

pub mod dialogs;
pub mod input;
pub mod simulator;

pub use dialogs::{ConfirmRequest, Confirmer, Dialogs, FileChooser, FileDialogRequest};
pub use input::{InputEvent, Key, KeyAction, Modifiers, MouseButton, PostedEvent, WidgetId};
pub use simulator::{DialogExpectation, Simulator};
