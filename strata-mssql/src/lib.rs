//! Microsoft SQL Server schema executor for the Strata migration engine.
//!
//! [`MssqlExecutor`] runs migration batches over one connected `tiberius`
//! client. Connecting (TCP, TLS, authentication) is left to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::{ExecutionMode, Migrator, MigratorConfig, StaticMigrationSource};
//! use strata_mssql::MssqlExecutor;
//! use tiberius::{Client, Config};
//! use tokio::net::TcpStream;
//! use tokio_util::compat::TokioAsyncWriteCompatExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_ado_string("server=tcp:localhost,1433;user=sa;password=...;TrustServerCertificate=true")?;
//!     let tcp = TcpStream::connect(config.get_addr()).await?;
//!     let client = Client::connect(config, tcp.compat_write()).await?;
//!
//!     let executor = Arc::new(MssqlExecutor::new(client, "Blogging"));
//!     let source = Arc::new(StaticMigrationSource::new(my_migrations()));
//!     let migrator = Migrator::new(MigratorConfig::new(), source, executor);
//!     migrator.apply(None, ExecutionMode::Execute).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod executor;

pub use error::{MssqlError, MssqlResult, classify, is_transient_code};
pub use executor::MssqlExecutor;
