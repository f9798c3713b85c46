// Form checks run before anything reaches the qa core.

pub const MAX_TAGS: usize = 10;

fn starts_with_letter(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

/// A title starts with a letter, has at least two characters and stays on one line.
pub fn check_title(raw: &str) -> Result<String, String> {
    let title = raw.trim();
    let ok = starts_with_letter(title)
        && title.chars().count() >= 2
        && !title.contains(['\n', '\t', '\r']);
    if ok {
        Ok(title.to_string())
    } else {
        Err("Start your title with a letter and do not use \\n, \\t, \\r".to_string())
    }
}

/// Question or answer body: starts with a letter, anything may follow.
pub fn check_text(raw: &str) -> Result<String, String> {
    let text = raw.trim_start();
    if starts_with_letter(text) {
        Ok(text.trim_end().to_string())
    } else {
        Err("Start your text with a letter".to_string())
    }
}

/// Nickname: starts with a letter, at least two characters, no whitespace.
pub fn check_nickname(raw: &str) -> Result<String, String> {
    let nickname = raw.trim();
    let ok = starts_with_letter(nickname)
        && nickname.chars().count() >= 2
        && !nickname.chars().any(char::is_whitespace);
    if ok {
        Ok(nickname.to_string())
    } else {
        Err("Start your nickname with a letter and do not use whitespace".to_string())
    }
}

/// Login name: 1-150 characters, no whitespace.
pub fn check_username(raw: &str) -> Result<String, String> {
    let username = raw.trim();
    let ok = !username.is_empty()
        && username.chars().count() <= 150
        && !username.chars().any(char::is_whitespace);
    if ok {
        Ok(username.to_string())
    } else {
        Err("Username must be 1-150 characters without whitespace".to_string())
    }
}

/// Required address of the form `local@domain.tld`.
pub fn check_email(raw: &str) -> Result<String, String> {
    let email = raw.trim();
    let well_formed = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split('.')
                    .filter(|part| !part.is_empty())
                    .count()
                    >= 2
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains("..")
        });
    if well_formed {
        Ok(email.to_string())
    } else {
        Err("Enter a valid email address".to_string())
    }
}

/// Accepts a comma-separated tag list. Blank entries are dropped and
/// case-insensitive duplicates merged before counting.
pub fn check_tags(raw: &str) -> Result<Vec<String>, String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if tag.chars().any(char::is_whitespace) {
            return Err(format!("Tag \"{tag}\" must not contain whitespace"));
        }
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            tags.push(tag.to_string());
        }
    }
    if tags.len() > MAX_TAGS {
        return Err(format!("You can choose no more than {MAX_TAGS} tags"));
    }
    Ok(tags)
}
