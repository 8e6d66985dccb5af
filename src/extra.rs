//! Conveniences built on top of shell commands: system properties, the
//! process table and installed package details.

use crate::conn::Dialer;
use crate::device::{Device, DeviceLister};
use crate::error::{AdbError, AdbResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PROPERTY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(.*?)\]:\s*\[(.*?)\]").expect("valid property regex"));
static CODE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"codePath=(\S+)").expect("valid codePath regex"));
static VERSION_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"versionCode=(\d+)").expect("valid versionCode regex"));
static VERSION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"versionName=(\S+)").expect("valid versionName regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub user: String,
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub path: String,
    pub version_code: u64,
    pub version_name: String,
}

/// Parse `getprop` output, `[key]: [value]` per line.
pub fn parse_properties(output: &str) -> HashMap<String, String> {
    PROPERTY_RE
        .captures_iter(output)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Parse `ps` output.
///
/// The header row names the columns. Data rows carry one more field than the
/// header (the process state letter), and the name is always the last field.
/// Rows of any other width and the PID 0 pseudo-process are skipped.
pub fn parse_processes(output: &str) -> Vec<Process> {
    let mut lines = output.lines();
    let header: Vec<String> = match lines.next() {
        Some(line) => line.split_whitespace().map(str::to_uppercase).collect(),
        None => return Vec::new(),
    };

    let mut processes = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            break;
        }
        if fields.len() != header.len() + 1 {
            continue;
        }

        let mut process = Process {
            user: String::new(),
            pid: 0,
            name: String::new(),
        };
        for (i, column) in header.iter().enumerate() {
            match column.as_str() {
                "PID" => process.pid = fields[i].parse().unwrap_or(0),
                "USER" => process.user = fields[i].to_string(),
                "NAME" => process.name = fields[fields.len() - 1].to_string(),
                _ => {}
            }
        }
        if process.pid == 0 {
            continue;
        }
        processes.push(process);
    }
    processes
}

/// Parse `dumpsys package <name>` output.
pub fn parse_package_info(name: &str, output: &str) -> AdbResult<PackageInfo> {
    let not_exist = || AdbError::file_not_found(format!("package {} not exist", name));
    let capture = |re: &Regex| {
        re.captures(output)
            .map(|c| c[1].to_string())
            .ok_or_else(not_exist)
    };

    let path = capture(&CODE_PATH_RE)?;
    let version_code = capture(&VERSION_CODE_RE)?
        .parse()
        .map_err(|_| not_exist())?;
    let version_name = capture(&VERSION_NAME_RE)?;
    Ok(PackageInfo {
        name: name.to_string(),
        path,
        version_code,
        version_name,
    })
}

impl<D: Dialer, L: DeviceLister> Device<D, L> {
    /// All system properties, from `getprop`.
    pub async fn properties(&self) -> AdbResult<HashMap<String, String>> {
        let output = self.command_output("getprop", &[] as &[&str]).await?;
        Ok(parse_properties(&output))
    }

    /// The device's process table, from `ps`.
    pub async fn list_processes(&self) -> AdbResult<Vec<Process>> {
        let output = self.command_output("ps", &[] as &[&str]).await?;
        Ok(parse_processes(&output))
    }

    /// Install path and version of a package. A package that is not
    /// installed is a `FileNotFound` error.
    pub async fn stat_package(&self, name: &str) -> AdbResult<PackageInfo> {
        let output = self.command_output("dumpsys", &["package", name]).await?;
        parse_package_info(name, &output).map_err(self.error_context("StatPackage"))
    }
}
