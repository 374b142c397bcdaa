/// Reserved words module for bash.
///
/// Bash keywords are recognized by the parser in command position and can
/// never name a variable usefully or a function at all, so rename refuses
/// them as new names.

/// Complete list of bash reserved words.
pub const RESERVED_WORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "case", "esac", "for", "select", "while", "until", "do",
    "done", "in", "function", "time", "coproc", "!", "[[", "]]", "{", "}",
];

/// Check if a name is a bash reserved word.
///
/// The check is case-sensitive.
///
/// # Examples
///
/// ```
/// use shoal::reserved_words::is_reserved_word;
///
/// assert!(is_reserved_word("if"));
/// assert!(is_reserved_word("esac"));
/// assert!(is_reserved_word("coproc"));
///
/// assert!(!is_reserved_word("myvar"));
/// assert!(!is_reserved_word("IF"));  // Case-sensitive
/// ```
pub fn is_reserved_word(name: &str) -> bool {
    matches!(
        name,
        "if" | "then"
            | "else"
            | "elif"
            | "fi"
            | "case"
            | "esac"
            | "for"
            | "select"
            | "while"
            | "until"
            | "do"
            | "done"
            | "in"
            | "function"
            | "time"
            | "coproc"
            | "!"
            | "[["
            | "]]"
            | "{"
            | "}"
    )
}
