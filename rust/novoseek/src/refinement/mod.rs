pub mod refiner;
pub mod selector;

pub use refiner::{
    IterativeRefiner,
    RefinementRequest,
};
pub use selector::RefinementSelector;
