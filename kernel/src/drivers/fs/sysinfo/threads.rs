//! Formats a [`ThreadInfo`] snapshot into the key-value block
//! `threads/<tid>` hands back on read.

use alloc::string::String;
use core::fmt::Write as _;

use crate::external::ThreadInfo;

pub fn format_thread_info(info: &ThreadInfo) -> String {
    let mut text = String::new();

    let _ = writeln!(text, "tid:{}", info.tid);
    let _ = writeln!(text, "birthTime:{}", info.birth_time);
    let _ = writeln!(text, "userMode:{}", info.user_mode);
    let _ = writeln!(text, "state:{}", info.state);
    let _ = writeln!(text, "syscalls:{}", info.syscalls);
    let _ = writeln!(text, "contextSwitches:{}", info.context_switches);
    let _ = writeln!(text, "cpuTime:{}", info.cpu_time_ms);
    let _ = writeln!(text, "cpuUsage:{}", info.cpu_usage);
    let _ = writeln!(text, "process:{}", info.process);

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_keys_in_spec_order() {
        let info = ThreadInfo {
            tid: 7,
            birth_time: 100,
            user_mode: true,
            state: "running".into(),
            syscalls: 3,
            context_switches: 2,
            cpu_time_ms: 42,
            cpu_usage: 5,
            process: "init".into(),
        };

        let text = format_thread_info(&info);
        let keys: alloc::vec::Vec<&str> = text
            .lines()
            .map(|line| line.split(':').next().unwrap())
            .collect();

        assert_eq!(
            keys,
            [
                "tid",
                "birthTime",
                "userMode",
                "state",
                "syscalls",
                "contextSwitches",
                "cpuTime",
                "cpuUsage",
                "process",
            ]
        );
        assert!(text.starts_with("tid:7\n"));
    }
}
