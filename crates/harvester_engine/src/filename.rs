const MAX_BASE_LEN: usize = 80;

/// File base name for a site: lowercase ASCII letters and digits, every other
/// run of characters collapsed to one `-`, no leading or trailing `-`.
///
/// `"White Settlement Independent School District"` becomes
/// `"white-settlement-independent-school-district"`.
pub fn file_base_name(site_name: &str) -> String {
    let mut base = String::with_capacity(site_name.len());
    let mut pending_dash = false;
    for c in site_name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !base.is_empty() {
                base.push('-');
            }
            pending_dash = false;
            base.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if base.len() > MAX_BASE_LEN {
        base.truncate(MAX_BASE_LEN);
        while base.ends_with('-') {
            base.pop();
        }
    }
    if base.is_empty() {
        return "harvest".to_string();
    }
    if is_reserved_windows_name(&base) {
        base.push_str("-site");
    }
    base
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
        "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
    ];
    RESERVED.contains(&name)
}
