//! Runtime components: the LLAP pipeline, byte sources and the bridge
//! driving both.

pub mod bridge;
pub mod llap;
pub mod source;
