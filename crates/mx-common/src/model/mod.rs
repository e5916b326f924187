pub mod history;
pub mod session;
pub mod task;

pub use history::{
    ExportStatus, HistoryPage, HistoryRecord, NewHistoryRecord, StatusUpdate,
};
pub use session::Session;
pub use task::{
    ExportChannel, ExportTask, ExportType, ACCESS_TOKEN_HEADER, CARRIED_HEADERS, PDF_MIME,
};
