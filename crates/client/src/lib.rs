pub mod net;

pub use net::{
    ClientConfig, ClientNetStats, ClockSync, GameClient, InterpolatedEntity, InterpolationConfig,
    Interpolator, PredictedState, PredictionConfig, PredictionController,
};
