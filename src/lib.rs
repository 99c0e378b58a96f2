//! # featurelag — lagging web features, page by page
//!
//! Counts the web features that a set of reference browsers all support but
//! a target browser does not yet, bucketed by release date, and pages
//! through the result with opaque keyset tokens.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use featurelag::prelude::*;
//!
//! let config = LagConfig::load_default()?;
//! let db = PgExecutor::connect("postgres://localhost/webstatus", 5).await?;
//! let client = LaggingClient::new(db, &config)?;
//!
//! let window = TimeWindow::new(start, end)?;
//! let request = LaggingFeatureCountRequest::new("safari", ["chrome", "firefox"], window, 100);
//! let page = client.list_lagging_feature_count(&request).await?;
//! // Pass page.next_page_token back to continue.
//! ```
//!
//! ## Pieces
//!
//! | Module      | Role                                              |
//! |-------------|---------------------------------------------------|
//! | `template`  | Compiles query skeletons with `if`/`range` blocks |
//! | `statement` | SQL text plus named parameters                    |
//! | `cursor`    | Opaque page tokens                                |
//! | `lagging`   | The lagging feature count query and its request   |
//! | `engine`    | Executor seam, page assembly, client              |

pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod lagging;
pub mod statement;
pub mod template;

pub mod prelude {
    pub use crate::config::LagConfig;
    pub use crate::cursor::Cursor;
    pub use crate::engine::{
        FromQueryRow, LaggingClient, Page, PgExecutor, QueryExecutor, QueryRow, SortKey,
        assemble_page,
    };
    pub use crate::error::*;
    pub use crate::lagging::{
        LaggingFeatureCount, LaggingFeatureCountPage, LaggingFeatureCountRequest, TimeWindow,
    };
    pub use crate::statement::{ParamName, ParamValue, Statement};
}
