pub mod ecg;
pub mod threshold;
