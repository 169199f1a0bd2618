use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo};

/// Point-in-time resource usage of one child process.
#[derive(Debug, Clone, Default)]
pub struct StatSnapshot {
	pub mem: u64,
	pub cpu: f64,
	pub fd_num: u32,
	pub paths: Vec<String>,
	pub connections: Vec<String>,
}

/// Sample everything we report for a pid. Each metric degrades to
/// zero or empty on its own when the kernel refuses us.
pub fn sample(pid: u32) -> StatSnapshot {
	StatSnapshot {
		mem: memory_rss(pid).unwrap_or(0),
		cpu: cpu_percent(pid).unwrap_or(0.0),
		fd_num: fd_count(pid).unwrap_or(0),
		paths: open_paths(pid),
		connections: local_endpoints(pid),
	}
}

#[cfg(target_os = "linux")]
fn memory_rss(pid: u32) -> Option<u64> {
	let statm = std::fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
	let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
	Some(rss_pages * page_size())
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
	let val = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
	if val > 0 {
		val as u64
	} else {
		4096
	}
}

/// Lifetime cpu average in percent, from /proc/<pid>/stat against the
/// host uptime. Good enough to spot a spinning service in the console.
#[cfg(target_os = "linux")]
fn cpu_percent(pid: u32) -> Option<f64> {
	let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
	// comm can hold spaces, fields only count after the closing paren
	let after_comm = stat.rsplit(')').next()?;
	let fields: Vec<&str> = after_comm.split_whitespace().collect();
	let utime: u64 = fields.get(11)?.parse().ok()?;
	let stime: u64 = fields.get(12)?.parse().ok()?;
	let starttime: u64 = fields.get(19)?.parse().ok()?;

	let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
	let hz = if ticks > 0 { ticks as f64 } else { 100.0 };
	let uptime: f64 = std::fs::read_to_string("/proc/uptime")
		.ok()?
		.split_whitespace()
		.next()?
		.parse()
		.ok()?;

	let lifetime = uptime - starttime as f64 / hz;
	if lifetime <= 0.0 {
		return Some(0.0);
	}
	let used = (utime + stime) as f64 / hz;
	Some(used / lifetime * 100.0)
}

#[cfg(target_os = "linux")]
fn fd_count(pid: u32) -> Option<u32> {
	let entries = std::fs::read_dir(format!("/proc/{}/fd", pid)).ok()?;
	Some(entries.count() as u32)
}

#[cfg(target_os = "linux")]
fn open_paths(pid: u32) -> Vec<String> {
	let entries = match std::fs::read_dir(format!("/proc/{}/fd", pid)) {
		Ok(e) => e,
		Err(_) => return Vec::new(),
	};
	let mut paths = Vec::new();
	for entry in entries.flatten() {
		if let Ok(target) = std::fs::read_link(entry.path()) {
			let target = target.to_string_lossy().to_string();
			// skip pipe:[...] / socket:[...] pseudo-targets
			if target.starts_with('/') {
				paths.push(target);
			}
		}
	}
	paths
}

#[cfg(not(target_os = "linux"))]
fn memory_rss(_pid: u32) -> Option<u64> {
	None
}

#[cfg(not(target_os = "linux"))]
fn cpu_percent(_pid: u32) -> Option<f64> {
	None
}

#[cfg(not(target_os = "linux"))]
fn fd_count(_pid: u32) -> Option<u32> {
	None
}

#[cfg(not(target_os = "linux"))]
fn open_paths(_pid: u32) -> Vec<String> {
	Vec::new()
}

/// `addr:port` for every tcp/udp socket the pid holds locally.
fn local_endpoints(pid: u32) -> Vec<String> {
	let af = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
	let proto = ProtocolFlags::TCP | ProtocolFlags::UDP;
	let sockets = match netstat2::get_sockets_info(af, proto) {
		Ok(s) => s,
		Err(_) => return Vec::new(),
	};
	let mut endpoints = Vec::new();
	for si in sockets {
		if !si.associated_pids.contains(&pid) {
			continue;
		}
		match si.protocol_socket_info {
			ProtocolSocketInfo::Tcp(ref tcp) => {
				endpoints.push(format!("{}:{}", tcp.local_addr, tcp.local_port));
			}
			ProtocolSocketInfo::Udp(ref udp) => {
				endpoints.push(format!("{}:{}", udp.local_addr, udp.local_port));
			}
		}
	}
	endpoints
}
