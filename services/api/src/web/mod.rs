pub mod rest;
pub mod state;

// Re-export the handlers to make them easily accessible
// to the binary that will build the web server router.
pub use rest::{
    delete_session_handler, export_session_handler, get_session_handler, list_sessions_handler,
    process_upload_handler, session_results_handler, statistics_handler, update_review_handler,
};
