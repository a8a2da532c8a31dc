mod app;
mod engine;
mod error;
mod model;
mod notation;
mod player;
mod tracker;
mod util;

pub use app::*;
pub use engine::output::*;
pub use engine::session::PlaybackSession;
pub use engine::*;
pub use error::*;
pub use model::config::*;
pub use model::keys::*;
pub use model::score::*;
pub use notation::abc::*;
pub use notation::*;
pub use player::*;
pub use tracker::*;
pub use util::*;
