pub mod types;
pub mod filter;
pub mod filter_where;
pub mod filter_order;
pub mod filter_sql;
pub mod error;

pub use types::*;
pub use filter::{Filter, RESERVED_PARAMS};
pub use filter_order::FilterOrder;
pub use filter_where::FilterWhere;
pub use filter_sql::FilterSql;
pub use error::FilterError;
