pub mod signal_log;
