// projeto: lstmseqtrain
// file: src/lib.rs
// Tabular time-series feature pipeline and cancellable training loop

pub mod neural;
