pub mod policy;
pub mod resilient_node;

pub use policy::ErrorPolicy;
pub use resilient_node::ResilientNode;
