pub mod config;
pub mod encoder;
pub mod hostfile;
pub mod light;
pub mod osc;
pub mod oscsink;
pub mod processor;
pub mod runinfo;
pub mod runner;
pub mod script;
pub mod timerqueue;
pub mod transport;
