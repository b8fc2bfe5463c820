pub mod biometrics;
pub mod buffer;
pub mod catalog;
pub mod correlator;
pub mod dispatcher;
pub mod lifecycle;
pub mod matcher;
pub mod normalizer;
pub mod record;
pub mod session;
pub mod telemetry;
pub mod time;
pub mod trigger;
