use chrono::{DateTime, NaiveDate, Utc};

use cinegraph_common::types::{MovieRecord, MovieRow, RatingRecord, RatingRow, TagRecord, TagRow};

/// Delimiter inside the multi-valued movie columns.
pub const LIST_DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("invalid {field} '{value}'")]
    Invalid { field: &'static str, value: String },

    #[error("undecodable row: {0}")]
    Undecodable(String),
}

pub fn parse_movie(row: &MovieRow) -> Result<MovieRecord, FieldError> {
    Ok(MovieRecord {
        id: required("movieId", &row.movie_id)?,
        title: optional(&row.title),
        tagline: optional(&row.tagline),
        released: optional(&row.released)
            .map(|v| parse_date("released", &v))
            .transpose()?,
        imdb_rating: optional(&row.imdb_rating)
            .map(|v| parse_float("imdbRating", &v))
            .transpose()?,
        directors: split_list(&row.director),
        actors: split_list(&row.actors),
        genres: split_list(&row.genres),
    })
}

pub fn parse_rating(row: &RatingRow) -> Result<RatingRecord, FieldError> {
    let rating = required("rating", &row.rating)?;
    let timestamp = required("timestamp", &row.timestamp)?;
    Ok(RatingRecord {
        user_id: required("userId", &row.user_id)?,
        movie_id: required("movieId", &row.movie_id)?,
        rating: parse_float("rating", &rating)?,
        timestamp: parse_epoch("timestamp", &timestamp)?,
    })
}

/// The tag text is kept raw; an empty tag is not a parse failure.
pub fn parse_tag(row: &TagRow) -> Result<TagRecord, FieldError> {
    let timestamp = required("timestamp", &row.timestamp)?;
    Ok(TagRecord {
        user_id: required("userId", &row.user_id)?,
        movie_id: required("movieId", &row.movie_id)?,
        tag: row.tag.clone(),
        timestamp: parse_epoch("timestamp", &timestamp)?,
    })
}

/// Split a delimited list, trimming tokens and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

/// Canonical form of a tag: trimmed and lower-cased.
pub fn normalize_tag(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn required(field: &'static str, raw: &str) -> Result<String, FieldError> {
    optional(raw).ok_or(FieldError::Missing(field))
}

fn optional(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_float(field: &'static str, value: &str) -> Result<f64, FieldError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(field, value))
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, FieldError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid(field, value))
}

/// Epoch seconds. Fractional seconds are truncated.
fn parse_epoch(field: &'static str, value: &str) -> Result<DateTime<Utc>, FieldError> {
    let seconds = match value.parse::<i64>() {
        Ok(s) => Some(s),
        Err(_) => value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.trunc() as i64),
    };
    seconds
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| invalid(field, value))
}

fn invalid(field: &'static str, value: &str) -> FieldError {
    FieldError::Invalid {
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie_row() -> MovieRow {
        MovieRow {
            movie_id: "1".into(),
            title: "Toy Story".into(),
            tagline: "".into(),
            released: "1995-11-22".into(),
            imdb_rating: "8.3".into(),
            director: "John Lasseter".into(),
            actors: " Tom Hanks | Tim Allen||".into(),
            genres: "Adventure|Animation".into(),
        }
    }

    #[test]
    fn test_parse_movie_trims_and_skips_empty_tokens() {
        let record = parse_movie(&movie_row()).unwrap();
        assert_eq!(record.actors, vec!["Tom Hanks", "Tim Allen"]);
        assert_eq!(record.tagline, None);
        assert_eq!(record.released, NaiveDate::from_ymd_opt(1995, 11, 22));
        assert_eq!(record.imdb_rating, Some(8.3));
    }

    #[test]
    fn test_empty_scalars_stay_unset() {
        let row = MovieRow {
            released: " ".into(),
            imdb_rating: "".into(),
            ..movie_row()
        };
        let record = parse_movie(&row).unwrap();
        assert_eq!(record.released, None);
        assert_eq!(record.imdb_rating, None);
    }

    #[test]
    fn test_malformed_scalars_fail() {
        let bad_date = MovieRow {
            released: "22/11/1995".into(),
            ..movie_row()
        };
        assert!(matches!(
            parse_movie(&bad_date),
            Err(FieldError::Invalid { field: "released", .. })
        ));

        let bad_rating = MovieRow {
            imdb_rating: "great".into(),
            ..movie_row()
        };
        assert!(parse_movie(&bad_rating).is_err());

        let no_id = MovieRow {
            movie_id: "".into(),
            ..movie_row()
        };
        assert_eq!(parse_movie(&no_id), Err(FieldError::Missing("movieId")));
    }

    #[test]
    fn test_parse_rating_epoch() {
        let row = RatingRow {
            user_id: "1".into(),
            movie_id: "31".into(),
            rating: "2.5".into(),
            timestamp: "1260759144".into(),
        };
        let record = parse_rating(&row).unwrap();
        assert_eq!(record.timestamp.timestamp(), 1_260_759_144);
        assert!((record.rating - 2.5).abs() < f64::EPSILON);

        let bad = RatingRow {
            rating: "NaN".into(),
            ..row
        };
        assert!(parse_rating(&bad).is_err());
    }

    #[test]
    fn test_parse_tag_keeps_raw_text() {
        let row = TagRow {
            user_id: "2".into(),
            movie_id: "60756".into(),
            tag: " Great Movie ".into(),
            timestamp: "1445714994".into(),
        };
        assert_eq!(parse_tag(&row).unwrap().tag, " Great Movie ");
        assert_eq!(normalize_tag(" Great Movie "), "great movie");
        assert_eq!(normalize_tag("   "), "");
    }
}
