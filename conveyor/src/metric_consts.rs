pub const RECORDS_RECEIVED: &str = "conveyor_records_received";
pub const RECORDS_PROCESSED: &str = "conveyor_records_processed";
pub const RECORDS_FAILED: &str = "conveyor_records_failed";
pub const RECORDS_DEAD_LETTERED: &str = "conveyor_records_dead_lettered";
pub const COMMITS_FLUSHED: &str = "conveyor_commits_flushed";
pub const RETRY_SLEEPS: &str = "conveyor_retry_sleeps";
pub const BATCH_RELEASE_SIZE: &str = "conveyor_batch_release_size";
pub const LOOP_STOPS: &str = "conveyor_loop_stops";
