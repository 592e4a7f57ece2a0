//! Command lines for mutating a host.
//!
//! The remote transport runs these over its session, the local transport
//! runs the account ones directly, and the dry transport logs them instead
//! of running them.

use crate::types::{Cmd, Group, Password, User};

pub fn chmod(path: &str, mode: u32) -> Cmd {
    Cmd::new("chmod", [format!("{mode:o}"), path.to_string()])
}

pub fn chown(path: &str, uid: u32, gid: u32) -> Cmd {
    Cmd::new("chown", [format!("{uid}:{gid}"), path.to_string()])
}

/// Remove a file or an empty directory.
pub fn remove(path: &str) -> Cmd {
    Cmd::new("rm", ["-d", path])
}

/// One entry per line. The trailing slash makes `ls` fail on a non-directory.
pub fn list_dir(path: &str) -> Cmd {
    let dir = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    Cmd::read_only("ls", ["-1A".to_string(), dir])
}

pub fn rename(from: &str, to: &str) -> Cmd {
    Cmd::new("mv", [from, to])
}

pub fn mkdir_all(path: &str, mode: u32) -> Cmd {
    Cmd::new("mkdir", ["-p".to_string(), "-m".to_string(), format!("{mode:o}"), path.to_string()])
}

/// Write stdin to `path`, creating or truncating it.
pub fn write_file(path: &str, content: &[u8]) -> Cmd {
    Cmd::new("sh", ["-c", "cat > \"$1\"", "sh", path]).stdin(content)
}

pub fn mktemp_dir() -> Cmd {
    Cmd::new("mktemp", ["-d", "/tmp/tmpsteward_XXXXXXXX"])
}

pub fn remove_tree(path: &str) -> Cmd {
    Cmd::new("rm", ["-rf", path])
}

pub fn useradd(user: &User) -> Cmd {
    let mut args = vec!["-u".to_string(), user.uid.to_string()];
    if !user.group.is_empty() {
        args.extend(["-g".to_string(), user.group.clone()]);
    }
    if !user.groups.is_empty() {
        args.extend(["-G".to_string(), user.groups.join(",")]);
    }
    if !user.home.is_empty() {
        args.extend(["-d".to_string(), user.home.clone()]);
    }
    if !user.shell.is_empty() {
        args.extend(["-s".to_string(), user.shell.clone()]);
    }
    args.push(user.name.clone());
    Cmd::new("useradd", args)
}

/// `usermod` with only the fields that differ, or `None` when nothing does.
pub fn usermod(current: &User, desired: &User) -> Option<Cmd> {
    let mut args = Vec::new();
    if current.uid != desired.uid {
        args.extend(["-u".to_string(), desired.uid.to_string()]);
    }
    if !desired.group.is_empty() && current.group != desired.group {
        args.extend(["-g".to_string(), desired.group.clone()]);
    }
    if current.groups != desired.groups {
        args.extend(["-G".to_string(), desired.groups.join(",")]);
    }
    if !desired.home.is_empty() && current.home != desired.home {
        args.extend(["-d".to_string(), desired.home.clone()]);
    }
    if !desired.shell.is_empty() && current.shell != desired.shell {
        args.extend(["-s".to_string(), desired.shell.clone()]);
    }
    if args.is_empty() {
        return None;
    }
    args.push(desired.name.clone());
    Some(Cmd::new("usermod", args))
}

pub fn userdel(name: &str) -> Cmd {
    Cmd::new("userdel", [name])
}

pub fn groupadd(group: &Group) -> Cmd {
    Cmd::new("groupadd", ["-g".to_string(), group.gid.to_string(), group.name.clone()])
}

pub fn groupmod(group: &Group) -> Cmd {
    Cmd::new("groupmod", ["-g".to_string(), group.gid.to_string(), group.name.clone()])
}

pub fn groupdel(name: &str) -> Cmd {
    Cmd::new("groupdel", [name])
}

pub fn set_password(password: &Password) -> Cmd {
    Cmd::new("usermod", ["-p", password.crypt.as_str(), password.name.as_str()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User {
            name: "alice".into(),
            uid: 1000,
            group: "staff".into(),
            groups: vec!["docker".into(), "wheel".into()],
            home: "/home/alice".into(),
            shell: "/bin/zsh".into(),
        }
    }

    #[test]
    fn test_chmod_renders_octal() {
        assert_eq!(chmod("/etc/motd", 0o644).to_shell(), "chmod 644 /etc/motd");
        assert_eq!(chown("/srv", 0, 10).to_shell(), "chown 0:10 /srv");
    }

    #[test]
    fn test_useradd() {
        assert_eq!(
            useradd(&alice()).to_shell(),
            "useradd -u 1000 -g staff -G docker,wheel -d /home/alice -s /bin/zsh alice"
        );
    }

    #[test]
    fn test_usermod_only_changed_fields() {
        let current = alice();
        assert!(usermod(&current, &current).is_none());

        let mut desired = alice();
        desired.shell = "/bin/bash".into();
        desired.groups = vec!["wheel".into()];
        assert_eq!(
            usermod(&current, &desired).unwrap().to_shell(),
            "usermod -G wheel -s /bin/bash alice"
        );
    }

    #[test]
    fn test_write_file_passes_path_as_argument() {
        let cmd = write_file("/tmp/it's here", b"data");
        assert_eq!(cmd.to_shell(), r#"sh -c 'cat > "$1"' sh '/tmp/it'\''s here'"#);
        assert_eq!(cmd.stdin.as_deref(), Some(&b"data"[..]));
        assert!(!cmd.read_only);
    }
}
