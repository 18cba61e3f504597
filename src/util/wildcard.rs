//! Filename comparison shared by every container format.
//!
//! `*` matches any run of characters (including none) and `?` matches
//! exactly one character.  Case sensitivity is decided by the container:
//! native CBM formats compare exactly, FAT-like formats ignore ASCII case.

/// Return true if `name` matches `pattern`.
pub fn matches(pattern: &str, name: &str, case_sensitive: bool) -> bool {
    let fold = |c: char| {
        if case_sensitive {
            c
        } else {
            c.to_ascii_uppercase()
        }
    };
    let pattern: Vec<char> = pattern.chars().map(fold).collect();
    let name: Vec<char> = name.chars().map(fold).collect();

    let (mut p, mut n) = (0, 0);
    // Position of the most recent '*' in the pattern, and the name position
    // it is currently assumed to have consumed up to.
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match star {
                Some((star_p, star_n)) => {
                    p = star_p + 1;
                    n = star_n + 1;
                    star = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert!(matches("*.PRG", "GAME.PRG", true));
        assert!(matches("GAME?.PRG", "GAME1.PRG", true));
        assert!(matches("*", "", true));
        assert!(matches("G*E*", "GAME.PRG", true));
        assert!(matches("GAME", "GAME", true));
        assert!(!matches("GAME?.PRG", "GAME.PRG", true));
        assert!(!matches("*.SEQ", "GAME.PRG", true));
        assert!(!matches("GAME", "GAMES", true));
    }

    #[test]
    fn test_case_sensitivity() {
        assert!(!matches("*.prg", "GAME.PRG", true));
        assert!(matches("*.prg", "GAME.PRG", false));
        assert!(!matches("game", "GAME", true));
        assert!(matches("game", "GAME", false));
    }
}
