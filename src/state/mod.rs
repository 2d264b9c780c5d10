mod sqlite;

pub use sqlite::SqliteTaskStore;
