pub mod bootstrap;
pub mod pipeline;
pub mod search;
pub mod state;

pub use bootstrap::run;
pub use pipeline::MarketPipeline;
pub use search::{SearchDebouncer, SearchState};
pub use state::{DashboardState, DataStatus, ListingView};
