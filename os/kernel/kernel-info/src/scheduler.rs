//! # Scheduler Tuning

/// Input clock of the programmable interval timer.
pub const PIT_BASE_FREQUENCY: u32 = 1_193_180;

/// Timer interrupt frequency programmed at boot.
pub const TIMER_FREQUENCY_HZ: u32 = 5;

/// Number of timer ticks between two scheduling decisions.
pub const TICKS_PER_SLICE: u32 = 5;

/// File descriptor slots per task.
pub const TASK_MAX_FILES: usize = 128;

/// Device opened on descriptors 0, 1 and 2 of every new task.
pub const TERMINAL_DEVICE: &str = "/dev/tty";

/// First user program.
pub const INIT_PROGRAM: &str = "/init/bin/trash";
