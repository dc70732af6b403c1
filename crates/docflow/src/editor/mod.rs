//! Document-server integration: save-back callbacks and editor sessions

mod callback;
mod session;

pub use callback::{
    derive_file_name, extension_from_content_type, CallbackPayload, CallbackQuery, CallbackResponse,
    EditorBridge, SavedDocument, STATUS_FORCE_SAVE, STATUS_READY_FOR_SAVE,
};
pub use session::{open_session, resolve_document, EditorSession, ResolvedDocument, SessionLookup, OFFICE_EXTENSIONS};
