pub mod artnet;
pub mod config;
pub mod console;
pub mod cue_list;
pub mod dmx_output;
pub mod dmx_types;
pub mod live_cue;
pub mod osc;
pub mod patch;
