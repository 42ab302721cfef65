pub mod directional_color;
pub mod flow_estimator;
pub mod flow_renderer;
pub mod frame;
pub mod histogram;
pub mod legend;
pub mod utils;
pub mod zone_grid;
