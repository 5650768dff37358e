use crate::process::{args, render_command, ProcessRunner};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const SYSTEMINFO: &str = "systeminfo";
const MIN_MAJOR_VERSION: u32 = 10;
const MIN_BUILD: u32 = 14393;
const HYPERVISOR_DETECTED: &str = "a hypervisor has been detected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    fields: BTreeMap<String, String>,
}

fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

impl SystemInfo {
    pub fn from_csv(text: &str) -> Option<Self> {
        let mut lines = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty());
        let header = parse_csv_line(lines.next()?);
        let row = parse_csv_line(lines.next()?);
        if header.len() != row.len() {
            return None;
        }
        Some(Self {
            fields: header
                .into_iter()
                .map(|name| name.trim().to_string())
                .zip(row)
                .collect(),
        })
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Trailing digit run of an `OS Version` value such as
/// `10.0.17134 N/A Build 17134`.
pub fn build_number(os_version: &str) -> Option<u32> {
    let trimmed = os_version.trim();
    let head = trimmed.trim_end_matches(|c: char| c.is_ascii_digit());
    trimmed.strip_prefix(head)?.parse().ok()
}

/// Returns `Some(true)` when any requirement for native Docker fails and
/// `None` when a required field is missing or unparseable.
pub fn requires_fallback(info: &SystemInfo) -> Option<bool> {
    let os_name = info.get("OS Name")?;
    let os_version = info.get("OS Version")?;
    let hyperv = info.get("Hyper-V Requirements")?;

    if !os_name.contains("Pro") {
        debug!("not running a Pro edition of Windows");
        return Some(true);
    }

    if leading_number(os_version)? < MIN_MAJOR_VERSION {
        debug!("not running Windows {MIN_MAJOR_VERSION}");
        return Some(true);
    }

    if build_number(os_version)? < MIN_BUILD {
        debug!("not running build {MIN_BUILD} or later");
        return Some(true);
    }

    if hyperv.to_lowercase().contains(HYPERVISOR_DETECTED) {
        return Some(false);
    }

    let mut missing = false;
    for entry in hyperv.split(',').filter(|entry| !entry.trim().is_empty()) {
        let (requirement, enabled) = entry.split_once(':').unwrap_or((entry, ""));
        if !enabled.trim().eq_ignore_ascii_case("yes") {
            debug!(
                "Hyper-V requirement \"{}\" is not available",
                requirement.trim()
            );
            missing = true;
        }
    }
    Some(missing)
}

/// Runs `systeminfo` on Windows hosts and reports whether the virtualization
/// fallback is required. Always `false` elsewhere and on any failure.
pub fn fallback_required<R: ProcessRunner + ?Sized>(runner: &R, os: &str) -> bool {
    if os != "windows" {
        return false;
    }
    debug!("detecting whether Docker Toolbox is required");
    let query = args(&["/FO", "CSV"]);
    let output = match runner.run(SYSTEMINFO, &query, None, &BTreeMap::new()) {
        Ok(output) if output.success() => output,
        Ok(output) => {
            warn!(
                "`{}` failed: {}",
                render_command(SYSTEMINFO, &query),
                output.stderr_text()
            );
            return false;
        }
        Err(err) => {
            warn!("failed to run `{}`: {err}", render_command(SYSTEMINFO, &query));
            return false;
        }
    };
    let decision = SystemInfo::from_csv(&output.stdout_text())
        .as_ref()
        .and_then(requires_fallback);
    decision.unwrap_or_else(|| {
        warn!("could not parse systeminfo output; assuming native Docker");
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{failed, ok, MockRunner};

    fn systeminfo_csv(os_name: &str, os_version: &str, hyperv: &str) -> String {
        format!(
            "\"Host Name\",\"OS Name\",\"OS Version\",\"Hyper-V Requirements\"\r\n\
             \"DEVBOX\",\"{os_name}\",\"{os_version}\",\"{hyperv}\"\r\n"
        )
    }

    const ALL_YES: &str = "VM Monitor Mode Extensions: Yes,Virtualization Enabled In Firmware: Yes,Second Level Address Translation: Yes,Data Execution Prevention Available: Yes";

    fn decide(os_name: &str, os_version: &str, hyperv: &str) -> Option<bool> {
        let info = SystemInfo::from_csv(&systeminfo_csv(os_name, os_version, hyperv))?;
        requires_fallback(&info)
    }

    #[test]
    fn csv_parser_handles_quoted_commas_and_escapes() {
        let info = SystemInfo::from_csv("\"A\",\"B\"\n\"x, y\",\"say \"\"hi\"\"\"\n").unwrap();
        assert_eq!(info.get("A"), Some("x, y"));
        assert_eq!(info.get("B"), Some("say \"hi\""));
    }

    #[test]
    fn csv_parser_rejects_truncated_output() {
        assert!(SystemInfo::from_csv("\"A\",\"B\"\n").is_none());
        assert!(SystemInfo::from_csv("\"A\",\"B\"\n\"only\"\n").is_none());
    }

    #[test]
    fn build_number_reads_trailing_digits() {
        assert_eq!(build_number("10.0.17134 N/A Build 17134"), Some(17134));
        assert_eq!(build_number("10.0.14393"), Some(14393));
        assert_eq!(build_number("10.0.17134 N/A Build"), None);
    }

    #[test]
    fn localized_version_without_trailing_build_is_undecided() {
        assert_eq!(build_number("10.0.19045 Build ビルド"), None);
        assert_eq!(build_number("10.0.19045 ビルド 19045"), Some(19045));
        assert_eq!(
            decide("Microsoft Windows 10 Pro", "10.0.19045 Build ビルド", ALL_YES),
            None
        );
    }

    #[test]
    fn windows_pro_with_hyperv_runs_natively() {
        assert_eq!(
            decide(
                "Microsoft Windows 10 Pro",
                "10.0.17134 N/A Build 17134",
                ALL_YES
            ),
            Some(false)
        );
    }

    #[test]
    fn any_failing_condition_forces_fallback() {
        assert_eq!(
            decide("Microsoft Windows 10 Home", "10.0.17134 N/A Build 17134", ALL_YES),
            Some(true)
        );
        assert_eq!(
            decide("Microsoft Windows 8.1 Pro", "6.3.9600 N/A Build 9600", ALL_YES),
            Some(true)
        );
        assert_eq!(
            decide("Microsoft Windows 10 Pro", "10.0.10586 N/A Build 10586", ALL_YES),
            Some(true)
        );
        assert_eq!(
            decide(
                "Microsoft Windows 10 Pro",
                "10.0.17134 N/A Build 17134",
                "VM Monitor Mode Extensions: Yes,Virtualization Enabled In Firmware: No"
            ),
            Some(true)
        );
    }

    #[test]
    fn detected_hypervisor_counts_as_available() {
        assert_eq!(
            decide(
                "Microsoft Windows 10 Pro",
                "10.0.17134 N/A Build 17134",
                "A hypervisor has been detected. Features required for Hyper-V will not be displayed."
            ),
            Some(false)
        );
    }

    #[test]
    fn non_windows_hosts_never_probe() {
        let runner = MockRunner::default();
        assert!(!fallback_required(&runner, "linux"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn probe_failures_degrade_to_native() {
        let runner = MockRunner::default();
        runner.push_for("CSV", failed("access denied"));
        assert!(!fallback_required(&runner, "windows"));

        let runner = MockRunner::default();
        runner.push_for("CSV", ok("garbage"));
        assert!(!fallback_required(&runner, "windows"));
    }

    #[test]
    fn probe_reports_fallback_for_home_edition() {
        let runner = MockRunner::default();
        runner.push_for(
            "CSV",
            ok(&systeminfo_csv(
                "Microsoft Windows 10 Home",
                "10.0.17134 N/A Build 17134",
                ALL_YES,
            )),
        );
        assert!(fallback_required(&runner, "windows"));
        let calls = runner.calls();
        assert_eq!(calls[0].program, "systeminfo");
        assert_eq!(calls[0].args, vec!["/FO".to_string(), "CSV".to_string()]);
    }
}
