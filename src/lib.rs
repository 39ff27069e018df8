mod attribute_value;
mod environment;
mod error;
mod flag;
mod flag_set;
mod flag_value;
mod service;
mod test_common;
mod traffic;
mod transport;

pub use attribute_value::*;
pub use environment::*;
pub use error::*;
pub use flag::*;
pub use flag_set::*;
pub use flag_value::*;
pub use service::*;
pub use traffic::TrafficType;
pub use transport::*;
