//! Civil date helpers for log naming and upload staging. Good enough for
//! filenames and line prefixes without pulling in a calendar crate.

pub fn now_secs() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap()
		.as_secs()
}

/// (year, month, day, hour, minute, second) in UTC.
pub fn secs_to_datetime(secs: u64) -> (u32, u32, u32, u32, u32, u32) {
	let days = (secs / 86400) as i64;
	let time_of_day = secs % 86400;
	let hour = (time_of_day / 3600) as u32;
	let minute = ((time_of_day % 3600) / 60) as u32;
	let second = (time_of_day % 60) as u32;

	let z = days + 719468;
	let era = if z >= 0 { z } else { z - 146096 } / 146097;
	let doe = (z - era * 146097) as u32;
	let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
	let y = yoe as i64 + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let d = doy - (153 * mp + 2) / 5 + 1;
	let m = if mp < 10 { mp + 3 } else { mp - 9 };
	let y = if m <= 2 { y + 1 } else { y };

	(y as u32, m, d, hour, minute, second)
}

/// Midnight UTC of the given date as a Unix timestamp. Two-digit years are
/// taken as 20xx.
pub fn date_to_epoch(year: u32, month: u32, day: u32) -> u64 {
	let full_year = if year < 100 { 2000 + year } else { year };
	let y = full_year as i64;
	let m = month as i64;
	let d = day as i64;

	let y_adj = if m <= 2 { y - 1 } else { y };
	let m_adj = if m <= 2 { m + 9 } else { m - 3 };

	let era = if y_adj >= 0 { y_adj } else { y_adj - 399 } / 400;
	let yoe = y_adj - era * 400;
	let doy = (153 * m_adj + 2) / 5 + d - 1;
	let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
	let days = era * 146097 + doe - 719468;
	(days * 86400) as u64
}

/// `MMDDHHMM` stamp used to suffix staged uploads.
pub fn stamp_mmddhhmm() -> String {
	let (_, month, day, hour, minute, _) = secs_to_datetime(now_secs());
	format!("{:02}{:02}{:02}{:02}", month, day, hour, minute)
}

/// `YY-MMDD` date plus hour and minute strings, for rotated log names.
pub fn now_ymdhm() -> (String, String, String) {
	let (year, month, day, hour, minute, _) = secs_to_datetime(now_secs());
	(
		format!("{:02}-{:02}{:02}", year % 100, month, day),
		format!("{:02}", hour),
		format!("{:02}", minute),
	)
}

/// `YYYY/MM/DD HH:MM:SS` prefix for log lines.
pub fn line_stamp(secs: u64) -> String {
	let (year, month, day, hour, minute, second) = secs_to_datetime(secs);
	format!(
		"{:04}/{:02}/{:02} {:02}:{:02}:{:02}",
		year, month, day, hour, minute, second
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_secs_to_datetime() {
		// 2025-01-01T00:00:00Z
		assert_eq!(secs_to_datetime(1735689600), (2025, 1, 1, 0, 0, 0));
		// 2026-08-28T13:45:07Z
		assert_eq!(secs_to_datetime(1787924707), (2026, 8, 28, 13, 45, 7));
	}

	#[test]
	fn test_date_to_epoch_round_trip() {
		let epoch = date_to_epoch(2026, 2, 14);
		assert_eq!(secs_to_datetime(epoch), (2026, 2, 14, 0, 0, 0));
		// two-digit years land in this century
		assert_eq!(date_to_epoch(26, 2, 14), epoch);
	}

	#[test]
	fn test_line_stamp() {
		assert_eq!(line_stamp(1735689600), "2025/01/01 00:00:00");
	}
}
