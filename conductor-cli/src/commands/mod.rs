mod backup;
mod passes;
mod schedule;

// Pass commands
pub use passes::{run_fire_due, run_poll, run_reap_expired, run_scheduler};

// Backup commands
pub use backup::{create_backup, delete_backup, list_backups, restore_backup, show_backup};

// Schedule commands
pub use schedule::{
    activate_schedule, create_schedule, deactivate_schedule, delete_schedule, list_schedules,
    show_schedule, update_schedule,
};
