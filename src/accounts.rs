//! Provisioning of users and groups the new release ships.
//!
//! The release's passwd/group files are diffed against the live ones and
//! missing accounts are created with the system account tools. Account
//! creation runs before group creation in the pipeline's fixed order, so a
//! new user whose primary group is also new is provisioned into the
//! sentinel group first and re-assigned once the group exists.

use std::fs;
use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::errors::UpgradeError;
use crate::process::Cmd;

/// One passwd-format record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

/// One group-format record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// How one missing user gets created.
#[derive(Debug, Clone)]
pub struct UserAction {
    pub entry: PasswdEntry,
    /// Name of the user's real primary group.
    pub group: String,
    /// True when the real group does not exist yet and the user is first
    /// provisioned into the sentinel group.
    pub via_sentinel: bool,
}

/// Everything that needs creating, in execution order: users (possibly via
/// the sentinel group), then groups, then group re-assignment.
#[derive(Debug, Default)]
pub struct ProvisionPlan {
    pub users: Vec<UserAction>,
    pub groups: Vec<GroupEntry>,
}

impl ProvisionPlan {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }
}

/// Parse passwd-format lines (`name:pw:uid:gid:gecos:home:shell`).
pub fn parse_passwd(content: &str) -> Result<Vec<PasswdEntry>> {
    let mut entries = Vec::new();
    for line in records(content) {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 {
            return Err(UpgradeError::Accounts(format!("malformed passwd line: {:?}", line)).into());
        }
        entries.push(PasswdEntry {
            name: fields[0].to_string(),
            uid: parse_id(fields[2], line)?,
            gid: parse_id(fields[3], line)?,
            gecos: fields[4].to_string(),
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
        });
    }
    Ok(entries)
}

/// Parse group-format lines (`name:pw:gid:member,member`).
pub fn parse_group(content: &str) -> Result<Vec<GroupEntry>> {
    let mut entries = Vec::new();
    for line in records(content) {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 4 {
            return Err(UpgradeError::Accounts(format!("malformed group line: {:?}", line)).into());
        }
        entries.push(GroupEntry {
            name: fields[0].to_string(),
            gid: parse_id(fields[2], line)?,
            members: fields[3]
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
        });
    }
    Ok(entries)
}

fn records(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

fn parse_id(field: &str, line: &str) -> Result<u32> {
    field
        .parse()
        .map_err(|_| UpgradeError::Accounts(format!("bad id in line: {:?}", line)).into())
}

/// Compute what the release ships that the live system lacks.
pub fn plan(
    release_users: &[PasswdEntry],
    release_groups: &[GroupEntry],
    live_users: &[PasswdEntry],
    live_groups: &[GroupEntry],
) -> ProvisionPlan {
    let live_user_names: std::collections::HashSet<&str> =
        live_users.iter().map(|u| u.name.as_str()).collect();
    let live_group_names: std::collections::HashSet<&str> =
        live_groups.iter().map(|g| g.name.as_str()).collect();

    let groups: Vec<GroupEntry> = release_groups
        .iter()
        .filter(|g| !live_group_names.contains(g.name.as_str()))
        .cloned()
        .collect();
    let new_group_names: std::collections::HashSet<&str> =
        groups.iter().map(|g| g.name.as_str()).collect();

    let group_for_gid = |gid: u32| -> Option<&str> {
        release_groups
            .iter()
            .find(|g| g.gid == gid)
            .or_else(|| live_groups.iter().find(|g| g.gid == gid))
            .map(|g| g.name.as_str())
    };

    let users = release_users
        .iter()
        .filter(|u| !live_user_names.contains(u.name.as_str()))
        .map(|u| {
            let group = group_for_gid(u.gid).unwrap_or("").to_string();
            let via_sentinel = group.is_empty() || new_group_names.contains(group.as_str());
            UserAction {
                entry: u.clone(),
                group,
                via_sentinel,
            }
        })
        .collect();

    ProvisionPlan { users, groups }
}

/// Create every account the release ships that the live system lacks.
pub fn provision(config: &Config) -> Result<()> {
    let release_dir = config.mount_dir.join(&config.config_dir);
    let release_passwd = release_dir.join("passwd");
    if !release_passwd.is_file() {
        println!("Release ships no account data; nothing to do.");
        return Ok(());
    }

    let live_dir = config.live_config_dir();
    let release_users = parse_passwd(&read(&release_passwd)?)?;
    let release_groups = parse_group(&read(&release_dir.join("group"))?)?;
    let live_users = parse_passwd(&read(&live_dir.join("passwd"))?)?;
    let live_groups = parse_group(&read(&live_dir.join("group"))?)?;

    let plan = plan(&release_users, &release_groups, &live_users, &live_groups);
    if plan.is_empty() {
        println!("All release accounts already exist.");
        return Ok(());
    }

    for action in &plan.users {
        let first_group = if action.via_sentinel {
            &config.sentinel_group
        } else {
            &action.group
        };
        println!("Creating user {} (group {})", action.entry.name, first_group);
        let mut cmd = root_args(config, Cmd::new(&config.useradd))
            .args(["-u", &action.entry.uid.to_string()])
            .args(["-g", first_group])
            .args(["-d", &action.entry.home])
            .args(["-s", &action.entry.shell]);
        if !action.entry.gecos.is_empty() {
            cmd = cmd.args(["-c", &action.entry.gecos]);
        }
        cmd.arg(&action.entry.name)
            .run()
            .map_err(|e| UpgradeError::Accounts(format!("{}: {:#}", action.entry.name, e)))?;
    }

    for group in &plan.groups {
        println!("Creating group {}", group.name);
        root_args(config, Cmd::new(&config.groupadd))
            .args(["-g", &group.gid.to_string()])
            .arg(&group.name)
            .run()
            .map_err(|e| UpgradeError::Accounts(format!("{}: {:#}", group.name, e)))?;
    }

    for action in plan.users.iter().filter(|a| a.via_sentinel && !a.group.is_empty()) {
        println!("Moving {} into group {}", action.entry.name, action.group);
        root_args(config, Cmd::new(&config.usermod))
            .args(["-g", &action.group])
            .arg(&action.entry.name)
            .run()
            .map_err(|e| UpgradeError::Accounts(format!("{}: {:#}", action.entry.name, e)))?;
    }

    Ok(())
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| UpgradeError::Accounts(format!("{}: {}", path.display(), e)).into())
}

fn root_args(config: &Config, cmd: Cmd) -> Cmd {
    if config.destdir == Path::new("/") {
        cmd
    } else {
        cmd.arg("--root").arg_path(&config.destdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASE_PASSWD: &str = "\
root:x:0:0:root:/root:/bin/sh
daemon:x:1:1:daemon:/:/sbin/nologin
_ntp:x:87:87:NTP daemon:/var/empty:/sbin/nologin
";
    const RELEASE_GROUP: &str = "\
wheel:x:0:root
daemon:x:1:
_ntp:x:87:
";
    const LIVE_PASSWD: &str = "\
root:x:0:0:root:/root:/bin/sh
daemon:x:1:1:daemon:/:/sbin/nologin
";
    const LIVE_GROUP: &str = "\
wheel:x:0:root
daemon:x:1:
";

    #[test]
    fn test_parse_passwd() {
        let users = parse_passwd(RELEASE_PASSWD).unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[2].name, "_ntp");
        assert_eq!(users[2].uid, 87);
        assert_eq!(users[2].shell, "/sbin/nologin");
    }

    #[test]
    fn test_parse_group_members() {
        let groups = parse_group(RELEASE_GROUP).unwrap();
        assert_eq!(groups[0].members, vec!["root"]);
        assert!(groups[1].members.is_empty());
    }

    #[test]
    fn test_malformed_lines_are_account_errors() {
        let err = parse_passwd("broken\n").unwrap_err();
        assert_eq!(crate::errors::exit_code_for(&err), 14);
        let err = parse_group("name:x:notanumber:\n").unwrap_err();
        assert_eq!(crate::errors::exit_code_for(&err), 14);
    }

    #[test]
    fn test_plan_detects_new_account_with_new_group() {
        let plan = plan(
            &parse_passwd(RELEASE_PASSWD).unwrap(),
            &parse_group(RELEASE_GROUP).unwrap(),
            &parse_passwd(LIVE_PASSWD).unwrap(),
            &parse_group(LIVE_GROUP).unwrap(),
        );
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].name, "_ntp");
        assert_eq!(plan.users.len(), 1);
        let action = &plan.users[0];
        assert_eq!(action.entry.name, "_ntp");
        assert_eq!(action.group, "_ntp");
        // Group doesn't exist yet: user goes through the sentinel group.
        assert!(action.via_sentinel);
    }

    #[test]
    fn test_plan_uses_real_group_when_it_exists() {
        let release_passwd = "_sshd:x:22:1:sshd:/var/empty:/sbin/nologin\n";
        let plan = plan(
            &parse_passwd(release_passwd).unwrap(),
            &parse_group(RELEASE_GROUP).unwrap(),
            &[],
            &parse_group(LIVE_GROUP).unwrap(),
        );
        let action = plan.users.iter().find(|a| a.entry.name == "_sshd").unwrap();
        assert_eq!(action.group, "daemon");
        assert!(!action.via_sentinel);
    }

    #[test]
    fn test_plan_empty_when_everything_exists() {
        let plan = plan(
            &parse_passwd(LIVE_PASSWD).unwrap(),
            &parse_group(LIVE_GROUP).unwrap(),
            &parse_passwd(LIVE_PASSWD).unwrap(),
            &parse_group(LIVE_GROUP).unwrap(),
        );
        assert!(plan.is_empty());
    }
}
