//! Injectable modal dialogs.
//!
//! Applications open file choosers and confirmation boxes through a shared
//! `Dialogs` table instead of calling a toolkit directly. Tests replace the
//! table's attributes with scripted stand-ins via the patch registry, so a
//! blocking modal never runs inside the event loop.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::errors::Result;
use crate::patch::target::{AttributeTable, PatchTarget, PatchValue};
use crate::simulate::input::WidgetId;

/// Attribute holding the multi-file chooser.
pub const OPEN_FILE_NAMES: &str = "open_file_names";
/// Attribute holding the yes/no confirmation box.
pub const QUESTION: &str = "question";

/// Stand-in signature for the file chooser.
pub type FileChooser = Arc<dyn Fn(&FileDialogRequest) -> Vec<PathBuf> + Send + Sync>;
/// Stand-in signature for the confirmation box. `true` means "yes".
pub type Confirmer = Arc<dyn Fn(&ConfirmRequest) -> bool + Send + Sync>;

/// Arguments of a file chooser call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDialogRequest {
    pub parent: Option<WidgetId>,
    pub caption: String,
    pub directory: PathBuf,
    pub filter: String,
}

/// Arguments of a confirmation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub parent: Option<WidgetId>,
    pub title: String,
    pub message: String,
}

/// The application's dialog entry points.
pub struct Dialogs {
    table: AttributeTable,
}

impl Dialogs {
    /// Dialogs that never show anything: choosers cancel, questions answer no.
    pub fn headless() -> Self {
        Self::with_handlers(
            Arc::new(|_: &FileDialogRequest| Vec::<PathBuf>::new()),
            Arc::new(|_: &ConfirmRequest| false),
        )
    }

    pub fn with_handlers(chooser: FileChooser, confirmer: Confirmer) -> Self {
        let table = AttributeTable::new("dialogs");
        table.insert(OPEN_FILE_NAMES, chooser);
        table.insert(QUESTION, confirmer);
        Self { table }
    }

    /// The chooser currently installed.
    pub fn file_chooser(&self) -> Result<FileChooser> {
        self.table.get::<FileChooser>(OPEN_FILE_NAMES)
    }

    /// The confirmer currently installed.
    pub fn confirmer(&self) -> Result<Confirmer> {
        self.table.get::<Confirmer>(QUESTION)
    }

    /// Ask for files. A mistyped stand-in counts as a cancelled dialog.
    pub fn open_file_names(&self, request: &FileDialogRequest) -> Vec<PathBuf> {
        match self.file_chooser() {
            Ok(chooser) => chooser(request),
            Err(e) => {
                eprintln!("[ALH-DIALOG] {e}");
                Vec::new()
            }
        }
    }

    /// Ask a yes/no question. A mistyped stand-in counts as "no".
    pub fn question(&self, request: &ConfirmRequest) -> bool {
        match self.confirmer() {
            Ok(confirmer) => confirmer(request),
            Err(e) => {
                eprintln!("[ALH-DIALOG] {e}");
                false
            }
        }
    }
}

impl Default for Dialogs {
    fn default() -> Self {
        Self::headless()
    }
}

impl PatchTarget for Dialogs {
    fn target_name(&self) -> &str {
        self.table.target_name()
    }

    fn read_attr(&self, attribute: &str) -> Result<PatchValue> {
        self.table.read_attr(attribute)
    }

    fn write_attr(&self, attribute: &str, value: PatchValue) -> Result<PatchValue> {
        self.table.write_attr(attribute, value)
    }
}

impl std::fmt::Debug for Dialogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Dialogs").field(&self.table).finish()
    }
}
