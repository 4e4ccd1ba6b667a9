pub mod compare;
pub mod config;
pub mod credentials;
pub mod db;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test_support;

/**
 * \brief SDK 常用模块的统一导出。
 */
pub mod prelude {
    pub use crate::compare;
    pub use crate::config;
    pub use crate::credentials;
    pub use crate::db;
    pub use crate::history;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::server;
    pub use crate::storage;
    pub use crate::telemetry;
}
