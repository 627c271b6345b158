//! Text normalization shared by linking, stage matching and search

/// Lowercase and strip Polish diacritics so comparisons ignore them
pub fn fold_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'ą' => 'a',
            'ć' => 'c',
            'ę' => 'e',
            'ł' => 'l',
            'ń' => 'n',
            'ó' => 'o',
            'ś' => 's',
            'ź' | 'ż' => 'z',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fold_text_strips_diacritics() {
        assert_eq!(fold_text("Ustawa o Ochronie Zdrowia Łąk"), "ustawa o ochronie zdrowia lak");
        assert_eq!(fold_text("źdźbło"), "zdzblo");
    }
}
