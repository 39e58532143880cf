use glam::{Vec3, Vec4};

use super::error::LoadError;

/// One `{ "key" "value" ... }` block of the entity lump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapEntity {
    pairs: Vec<(String, String)>,
}

impl MapEntity {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Last value for `key`; later duplicates win.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value for `key`, or an empty string.
    pub fn get(&self, key: &str) -> &str {
        self.value(key).unwrap_or("")
    }

    pub fn classname(&self) -> &str {
        self.get("classname")
    }

    pub fn get_int(&self, key: &str) -> i32 {
        leading_number(self.get(key))
            .parse::<f64>()
            .map(|v| v as i32)
            .unwrap_or(0)
    }

    pub fn get_float(&self, key: &str) -> f32 {
        leading_number(self.get(key)).parse().unwrap_or(0.0)
    }

    /// Space separated `x y z`; missing components are zero.
    pub fn get_vector(&self, key: &str) -> Vec3 {
        let mut parts = self
            .get(key)
            .split_whitespace()
            .map(|part| part.parse::<f32>().unwrap_or(0.0));
        Vec3::new(
            parts.next().unwrap_or(0.0),
            parts.next().unwrap_or(0.0),
            parts.next().unwrap_or(0.0),
        )
    }

    /// `r g b [brightness]` in 0..255 converted to a unit colour. When
    /// `scale` is set the brightness multiplies the channels.
    pub fn get_color(&self, key: &str, scale: bool) -> Vec4 {
        let values: Vec<f32> = self
            .get(key)
            .split_whitespace()
            .map(|part| part.parse().unwrap_or(0.0))
            .collect();
        let channel = |i: usize| values.get(i).copied().unwrap_or(0.0);
        let mut rgb = Vec3::new(channel(0), channel(1), channel(2));
        if scale {
            rgb *= values.get(3).copied().unwrap_or(255.0) / 255.0;
        }
        (rgb / 255.0).extend(1.0)
    }

    /// Brush model number from a `"model" "*N"` key.
    pub fn model_index(&self) -> Option<usize> {
        self.get("model").strip_prefix('*')?.parse().ok()
    }
}

fn leading_number(value: &str) -> &str {
    let value = value.trim_start();
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && i == 0)))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    &value[..end]
}

/// Parses the entity lump text.
pub fn parse_entities(text: &str) -> Result<Vec<MapEntity>, LoadError> {
    let mut tokens = Tokens { rest: text };
    let mut entities = Vec::new();

    while let Some(token) = tokens.next()? {
        if token != Token::Open {
            return Err(LoadError::malformed("entity lump: expected '{'"));
        }

        let mut entity = MapEntity::default();
        loop {
            match tokens.next()? {
                Some(Token::Close) => break,
                Some(Token::Quoted(key)) => match tokens.next()? {
                    Some(Token::Quoted(value)) => {
                        entity.pairs.push((key.to_owned(), value.to_owned()))
                    }
                    _ => {
                        return Err(LoadError::malformed(format!(
                            "entity lump: key '{key}' has no value"
                        )));
                    }
                },
                Some(Token::Open) => {
                    return Err(LoadError::malformed("entity lump: nested '{'"));
                }
                None => return Err(LoadError::malformed("entity lump: unterminated entity")),
            }
        }
        entities.push(entity);
    }

    Ok(entities)
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Quoted(&'a str),
}

struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn next(&mut self) -> Result<Option<Token<'a>>, LoadError> {
        self.rest = self
            .rest
            .trim_start_matches(|c: char| c.is_whitespace() || c == '\0');
        let mut chars = self.rest.chars();
        let token = match chars.next() {
            None => return Ok(None),
            Some('{') => Token::Open,
            Some('}') => Token::Close,
            Some('"') => {
                let body = &self.rest[1..];
                let end = body
                    .find('"')
                    .ok_or_else(|| LoadError::malformed("entity lump: unterminated string"))?;
                self.rest = &body[end + 1..];
                return Ok(Some(Token::Quoted(&body[..end])));
            }
            Some(c) => {
                return Err(LoadError::malformed(format!(
                    "entity lump: unexpected character '{c}'"
                )));
            }
        };
        self.rest = chars.as_str();
        Ok(Some(token))
    }
}
