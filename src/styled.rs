//! Entity-driven character annotation and word segmentation. Inbound
//! entities address UTF-16 code units, so the annotator tracks a UTF-16
//! cursor while walking Rust chars. Words are the atoms the line
//! breaker works with: maximal runs with identical styling, split at
//! emoji cluster edges, space transitions, explicit breaks, and around
//! every CJK character (which wraps per character, not per word).

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::emoji;
use crate::fonts::FontStyle;

/// One inbound formatting entity, in the chat-API wire shape.
#[derive(Debug, Clone, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub custom_emoji_id: Option<String>,
}

impl Entity {
    pub fn new(kind: &str, offset: u32, length: u32) -> Self {
        Self {
            kind: kind.to_owned(),
            offset,
            length,
            custom_emoji_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StyleSet {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub spoiler: bool,
    pub monospace: bool,
    pub mention: bool,
    pub custom_emoji: bool,
}

impl StyleSet {
    pub fn apply(&mut self, kind: &str) {
        match kind {
            "bold" => self.bold = true,
            "italic" => self.italic = true,
            "underline" => self.underline = true,
            "strikethrough" => self.strikethrough = true,
            "spoiler" => self.spoiler = true,
            "pre" | "code" | "pre_code" => self.monospace = true,
            "mention" | "text_mention" | "hashtag" | "email" | "phone_number" | "bot_command"
            | "url" | "text_link" => self.mention = true,
            "custom_emoji" => self.custom_emoji = true,
            _ => {}
        }
    }

    pub fn font_style(self) -> FontStyle {
        FontStyle::select(self.bold, self.italic, self.monospace)
    }
}

/// Which emoji cluster a word belongs to. The index ties all characters
/// of one cluster together; the key names its CDN sprite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiRef {
    pub index: usize,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct StyledWord {
    pub text: String,
    pub styles: StyleSet,
    pub emoji: Option<EmojiRef>,
    pub custom_emoji_id: Option<String>,
}

pub fn is_break_char(ch: char) -> bool {
    matches!(ch, '\n' | '\r')
}

pub fn is_space_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{000C}'
            | '\n'
            | '\r'
            | '\t'
            | '\u{000B}'
            | ' '
            | '\u{1680}'
            | '\u{2000}'..='\u{200A}'
            | '\u{2028}'
            | '\u{2029}'
            | '\u{205F}'
            | '\u{3000}'
    )
}

pub fn is_cjk_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{1100}'..='\u{11FF}'
            | '\u{2E80}'..='\u{2EFF}'
            | '\u{3000}'..='\u{33FF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{AC00}'..='\u{D7AF}'
            | '\u{F900}'..='\u{FAFF}'
    )
}

pub fn contains_break(word: &str) -> bool {
    word.contains("<br>") || word.chars().any(is_break_char)
}

pub fn contains_space(word: &str) -> bool {
    word.chars().any(is_space_char)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ltr,
    Rtl,
}

fn rtl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            "[\u{0590}-\u{05FF}\u{0600}-\u{06FF}\u{0750}-\u{077F}\
             \u{08A0}-\u{08FF}\u{FB50}-\u{FDFF}\u{FE70}-\u{FEFF}]",
        )
        .expect("rtl range regex should compile")
    })
}

/// Direction for the line starting at `start`, peeking at most ten
/// words ahead. The first RTL character wins.
pub fn line_direction(words: &[StyledWord], start: usize) -> Direction {
    for word in words.iter().skip(start).take(10) {
        if rtl_regex().is_match(&word.text) {
            return Direction::Rtl;
        }
    }
    Direction::Ltr
}

/// Splits annotated text into styled words. The Ukrainian `і` is
/// normalized to the Latin `i` first; the bundled faces have no glyph
/// for it.
pub fn segment(raw_text: &str, entities: &[Entity]) -> Vec<StyledWord> {
    let text = raw_text.replace('і', "i");
    let matches = emoji::scan(&text);

    struct CharInfo {
        ch: char,
        styles: StyleSet,
        emoji: Option<EmojiRef>,
        custom_emoji_id: Option<String>,
    }

    let mut chars: Vec<CharInfo> = Vec::with_capacity(text.len());
    let mut utf16_pos: u32 = 0;
    let mut match_cursor = 0usize;
    for (byte_index, ch) in text.char_indices() {
        while match_cursor < matches.len() && matches[match_cursor].end <= byte_index {
            match_cursor += 1;
        }
        let emoji = matches.get(match_cursor).and_then(|found| {
            (found.start <= byte_index).then(|| EmojiRef {
                index: match_cursor,
                key: found.key.clone(),
            })
        });

        let mut styles = StyleSet::default();
        let mut custom_emoji_id = None;
        for entity in entities {
            let start = entity.offset;
            let end = entity.offset.saturating_add(entity.length);
            if utf16_pos >= start && utf16_pos < end {
                styles.apply(&entity.kind);
            }
            if entity.kind == "custom_emoji" && utf16_pos == start {
                custom_emoji_id.clone_from(&entity.custom_emoji_id);
            }
        }

        chars.push(CharInfo {
            ch,
            styles,
            emoji,
            custom_emoji_id,
        });
        utf16_pos += ch.len_utf16() as u32;
    }

    let mut words: Vec<StyledWord> = Vec::new();
    for (index, info) in chars.iter().enumerate() {
        let boundary = index > 0 && {
            let last = &chars[index - 1];
            let emoji_boundary = match (&info.emoji, &last.emoji) {
                (Some(a), Some(b)) => a.index != b.index,
                (Some(_), None) | (None, Some(_)) => true,
                (None, None) => false,
            };
            emoji_boundary
                || is_break_char(info.ch)
                || (is_space_char(info.ch) != is_space_char(last.ch))
                || info.styles != last.styles
                || is_cjk_char(info.ch)
                || is_cjk_char(last.ch)
        };
        if boundary || words.is_empty() {
            words.push(StyledWord {
                text: info.ch.to_string(),
                styles: info.styles,
                emoji: info.emoji.clone(),
                custom_emoji_id: info.custom_emoji_id.clone(),
            });
        } else if let Some(word) = words.last_mut() {
            word.text.push(info.ch);
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(words: &[StyledWord]) -> Vec<&str> {
        words.iter().map(|w| w.text.as_str()).collect()
    }

    #[test]
    fn splits_on_space_transitions_and_groups_runs() {
        let words = segment("hello  world", &[]);
        assert_eq!(texts(&words), vec!["hello", "  ", "world"]);
    }

    #[test]
    fn ukrainian_i_is_replaced_before_segmentation() {
        let words = segment("привіт", &[]);
        assert_eq!(texts(&words), vec!["привiт"]);
    }

    #[test]
    fn entity_edges_split_words() {
        let entities = vec![Entity::new("bold", 0, 2)];
        let words = segment("hello", &entities);
        assert_eq!(texts(&words), vec!["he", "llo"]);
        assert!(words[0].styles.bold);
        assert!(!words[1].styles.bold);
    }

    #[test]
    fn entity_offsets_count_utf16_units() {
        // The emoji occupies two UTF-16 units, so offset 2 starts at 'a'.
        let entities = vec![Entity::new("italic", 2, 2)];
        let words = segment("😀ab", &entities);
        assert_eq!(texts(&words), vec!["😀", "ab"]);
        assert!(words[1].styles.italic);
        assert!(words[0].emoji.is_some());
    }

    #[test]
    fn cjk_characters_become_single_words() {
        let words = segment("你好ok", &[]);
        assert_eq!(texts(&words), vec!["你", "好", "ok"]);
    }

    #[test]
    fn break_chars_are_their_own_words() {
        let words = segment("a\nb", &[]);
        assert_eq!(texts(&words), vec!["a", "\n", "b"]);
        assert!(contains_break(&words[1].text));
    }

    #[test]
    fn link_like_entities_map_to_mention() {
        let entities = vec![Entity::new("url", 0, 4)];
        let words = segment("t.me", &entities);
        assert!(words[0].styles.mention);
        assert_eq!(words[0].styles.font_style(), FontStyle::Regular);
    }

    #[test]
    fn custom_emoji_id_attaches_to_the_cluster_start() {
        let mut entity = Entity::new("custom_emoji", 0, 2);
        entity.custom_emoji_id = Some("5368324170671202286".into());
        let words = segment("😀 tail", &[entity]);
        assert_eq!(
            words[0].custom_emoji_id.as_deref(),
            Some("5368324170671202286")
        );
        assert!(words[0].styles.custom_emoji);
        assert!(words[1].custom_emoji_id.is_none());
    }

    #[test]
    fn adjacent_emoji_clusters_do_not_merge() {
        let words = segment("😀😀", &[]);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].emoji.as_ref().unwrap().index, 0);
        assert_eq!(words[1].emoji.as_ref().unwrap().index, 1);
    }

    #[test]
    fn rtl_lookahead_stops_after_ten_words() {
        let mut words = segment("a b c d e f g h i j k", &[]);
        // 21 words with separators; append one RTL word at the end.
        words.push(StyledWord {
            text: "שלום".into(),
            styles: StyleSet::default(),
            emoji: None,
            custom_emoji_id: None,
        });
        assert_eq!(line_direction(&words, 0), Direction::Ltr);
        assert_eq!(line_direction(&words, words.len() - 1), Direction::Rtl);
    }
}
