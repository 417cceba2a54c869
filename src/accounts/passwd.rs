/// UID of `user` in `/etc/passwd` formatted text.
pub fn parse_passwd_uid(text: &str, user: &str) -> Option<u32> {
    field_of(text, user, 2)
}

/// GID of `group` in `/etc/group` formatted text.
pub fn parse_group_gid(text: &str, group: &str) -> Option<u32> {
    field_of(text, group, 2)
}

fn field_of(text: &str, name: &str, index: usize) -> Option<u32> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let mut fields = line.split(':');
            (fields.next()? == name)
                .then(|| fields.nth(index - 1))
                .flatten()
                .and_then(|value| value.parse().ok())
        })
}
