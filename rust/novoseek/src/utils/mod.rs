pub mod serde;

pub use self::serde::{
    load_compressed,
    load_or_build_knapsack,
    save_compressed,
};
