#![no_main]
use elios4you::protocol::{Command, parse_response};
use elios4you::snapshot::DeviceSnapshot;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    // Both line layouts, then feed the result through the snapshot
    let mut snapshot = DeviceSnapshot::default();
    let dat = parse_response(&Command::Dat, &text);
    snapshot.apply_dat(&dat);
    let sta = parse_response(&Command::Sta, &text);
    snapshot.apply_sta(&sta);
    let inf = parse_response(&Command::Inf, &text);
    snapshot.apply_inf(&inf);
    snapshot.recompute_derived();

    let _ = text.parse::<Command>();
});
