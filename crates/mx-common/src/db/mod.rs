pub mod history;
pub mod migrations;
pub mod pool;

pub use history::{
    delete_export_history, insert_export_history, list_history_by_agent, list_history_by_call,
    update_export_status, DEFAULT_PAGE_SIZE,
};
pub use migrations::run_migrations;
pub use pool::{create_pool_from_url, DbPoolError, PgPool};
