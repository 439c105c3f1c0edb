#![no_main]

use ccr_gateway::{parse_console_request, ConsoleRequest};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    match parse_console_request(&raw) {
        Ok(ConsoleRequest::UpdateTfCluster { cluster_name, .. }) => {
            assert!(!cluster_name.trim().is_empty());
        }
        Ok(ConsoleRequest::RunCommand { command, .. }) => {
            assert!(!command.trim().is_empty());
        }
        Ok(_) => {}
        Err(error) => {
            assert!(!format!("{error:#}").trim().is_empty());
        }
    }
});
