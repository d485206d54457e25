pub mod backfill_tests;
pub mod explorer_tests;
pub mod membership_tests;
pub mod parser_tests;
pub mod tracker_tests;
pub mod validation_tests;
pub mod webhook_tests;
