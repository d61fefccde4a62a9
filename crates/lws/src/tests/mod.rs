mod helpers;

mod misc_tests;
mod read_tests;
mod write_tests;
