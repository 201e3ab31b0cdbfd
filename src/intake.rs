use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use tracing::{info, warn};

pub const NA: &str = "N/A";
pub const SIN_ASIGNAR: &str = "Sin asignar";

/// Widths of the fixed-width listing line consumed downstream. The line is
/// exactly NAME_WIDTH + SURNAME_WIDTH + COURSE_WIDTH characters.
const NAME_WIDTH: usize = 8;
const SURNAME_WIDTH: usize = 20;
const COURSE_WIDTH: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid identifier format")]
pub struct InvalidIdentifierFormat;

/// Extracts a positive id from a plain numeric token such as "0042" or "42".
/// Only a leading digit run counts; anything after it is ignored. A token
/// that does not start with a digit, or whose digits are all zeros, is
/// malformed.
pub fn parse_numeric_id(text: &str) -> Result<i64, InvalidIdentifierFormat> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(InvalidIdentifierFormat);
    }
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        return Err(InvalidIdentifierFormat);
    }
    stripped.parse::<i64>().map_err(|_| InvalidIdentifierFormat)
}

/// Extracts a positive id from the first "ID-<digits>" occurrence anywhere
/// in the text, e.g. "ID-4 tipo: llegada". Trailing free text is ignored.
pub fn parse_prefixed_id(text: &str) -> Result<i64, InvalidIdentifierFormat> {
    let mut rest = text;
    while let Some(pos) = rest.find("ID-") {
        let tail = &rest[pos + 3..];
        let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            let stripped = digits.trim_start_matches('0');
            if stripped.is_empty() {
                return Err(InvalidIdentifierFormat);
            }
            return stripped.parse::<i64>().map_err(|_| InvalidIdentifierFormat);
        }
        rest = tail;
    }
    Err(InvalidIdentifierFormat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentCandidate {
    pub nombre: String,
    pub apellido: String,
    pub numero: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseCandidate {
    pub nombre: String,
    pub nombre_asesor: String,
}

fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Splits free-form parent text like "benita rios 67894532". The last
/// whitespace token is the phone number, unconditionally; the rest is the
/// name. Returns None when there is no name left (blank input, or a lone
/// number), in which case parent resolution is skipped entirely.
pub fn split_parent_text(text: &str) -> Option<ParentCandidate> {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    let numero = tokens.pop()?;
    if tokens.is_empty() {
        return None;
    }
    let nombre = ucfirst(tokens[0]);
    let apellido = if tokens.len() > 1 {
        tokens[1..]
            .iter()
            .map(|t| ucfirst(t))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        NA.to_string()
    };
    Some(ParentCandidate {
        nombre,
        apellido,
        numero: numero.to_string(),
    })
}

/// Splits free-form course text like "5 secun. Pedro Dominguez" on the first
/// period: course name before it, advisor name after it. Never fails; a
/// missing or empty advisor part becomes "Sin asignar". The name side can
/// legitimately trim to an empty string (input ".") and is passed through
/// as-is; the resolver flags that case.
pub fn split_course_text(text: &str) -> CourseCandidate {
    let (name_part, advisor_part) = match text.split_once('.') {
        Some((name, advisor)) => (name, Some(advisor)),
        None => (text, None),
    };
    let nombre_asesor = advisor_part
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| SIN_ASIGNAR.to_string());
    CourseCandidate {
        nombre: name_part.trim().to_string(),
        nombre_asesor,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resolved {
    pub id: i64,
    pub created: bool,
}

/// Find-or-create for padres. An existing row matches when its nombre
/// contains the candidate given name as a literal substring and its numero
/// is exactly equal. The create path goes through the unique index on
/// (nombre, numero): insert-if-absent, re-fetch on conflict, so two racing
/// intakes of the same text converge on one row.
pub fn resolve_or_create_parent(
    conn: &Connection,
    candidate: &ParentCandidate,
) -> rusqlite::Result<Resolved> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM padres WHERE instr(nombre, ?1) > 0 AND numero = ?2 LIMIT 1",
            (&candidate.nombre, &candidate.numero),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        info!(padre_id = id, "padre existente encontrado");
        return Ok(Resolved { id, created: false });
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO padres(nombre, apellido, numero) VALUES(?1, ?2, ?3)",
        (&candidate.nombre, &candidate.apellido, &candidate.numero),
    )?;
    if inserted == 1 {
        let id = conn.last_insert_rowid();
        info!(padre_id = id, "padre creado automáticamente");
        return Ok(Resolved { id, created: true });
    }

    // Lost the insert to a concurrent writer holding the same (nombre, numero).
    let id = conn.query_row(
        "SELECT id FROM padres WHERE nombre = ?1 AND numero = ?2",
        (&candidate.nombre, &candidate.numero),
        |r| r.get(0),
    )?;
    info!(padre_id = id, "padre existente encontrado");
    Ok(Resolved { id, created: false })
}

/// Find-or-create for cursos, matching on nombre containing the candidate
/// name. An empty candidate name would match every stored row as a
/// substring, so it is looked up by exact equality instead, and its creation
/// is logged as a warning: the upstream text was just ".".
pub fn resolve_or_create_course(
    conn: &Connection,
    candidate: &CourseCandidate,
) -> rusqlite::Result<Resolved> {
    let existing: Option<i64> = if candidate.nombre.is_empty() {
        conn.query_row("SELECT id FROM cursos WHERE nombre = '' LIMIT 1", [], |r| {
            r.get(0)
        })
        .optional()?
    } else {
        conn.query_row(
            "SELECT id FROM cursos WHERE instr(nombre, ?1) > 0 LIMIT 1",
            [&candidate.nombre],
            |r| r.get(0),
        )
        .optional()?
    };
    if let Some(id) = existing {
        info!(curso_id = id, "curso existente encontrado");
        return Ok(Resolved { id, created: false });
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO cursos(nombre, nombre_asesor) VALUES(?1, ?2)",
        (&candidate.nombre, &candidate.nombre_asesor),
    )?;
    if inserted == 1 {
        let id = conn.last_insert_rowid();
        if candidate.nombre.is_empty() {
            warn!(curso_id = id, "curso creado con nombre vacío");
        } else {
            info!(curso_id = id, "curso creado automáticamente");
        }
        return Ok(Resolved { id, created: true });
    }

    let id = conn.query_row(
        "SELECT id FROM cursos WHERE nombre = ?1",
        [&candidate.nombre],
        |r| r.get(0),
    )?;
    info!(curso_id = id, "curso existente encontrado");
    Ok(Resolved { id, created: false })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWidthRecord {
    /// Decimal id, left-zero-padded to at least 4 digits.
    pub id_field: String,
    /// nombre(8) + apellido(20) + curso(12), truncated and right-padded
    /// with spaces; always exactly 40 characters.
    pub line: String,
}

fn fit(s: &str, width: usize) -> String {
    let mut out: String = s.chars().take(width).collect();
    let used = out.chars().count();
    for _ in used..width {
        out.push(' ');
    }
    out
}

/// Renders the aligned listing fields for a student record. Pure: same
/// inputs always produce the same output.
pub fn encode_fixed_width(
    id: i64,
    nombre: &str,
    apellido: &str,
    curso_nombre: &str,
) -> FixedWidthRecord {
    FixedWidthRecord {
        id_field: format!("{:04}", id),
        line: format!(
            "{}{}{}",
            fit(nombre, NAME_WIDTH),
            fit(apellido, SURNAME_WIDTH),
            fit(curso_nombre, COURSE_WIDTH)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "CREATE TABLE cursos(
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 nombre TEXT NOT NULL,
                 nombre_asesor TEXT NOT NULL DEFAULT 'Sin asignar'
             );
             CREATE UNIQUE INDEX ux_cursos_nombre ON cursos(nombre);
             CREATE TABLE padres(
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 nombre TEXT NOT NULL,
                 apellido TEXT NOT NULL DEFAULT 'N/A',
                 numero TEXT NOT NULL DEFAULT 'N/A',
                 user_id INTEGER
             );
             CREATE UNIQUE INDEX ux_padres_nombre_numero ON padres(nombre, numero);",
        )
        .expect("create tables");
        conn
    }

    #[test]
    fn numeric_id_strips_leading_zeros() {
        assert_eq!(parse_numeric_id("0007"), Ok(7));
        assert_eq!(parse_numeric_id("42"), Ok(42));
        assert_eq!(parse_numeric_id("0042"), Ok(42));
        // Trailing content after the digit run is ignored.
        assert_eq!(parse_numeric_id("12 Luis Gomez"), Ok(12));
    }

    #[test]
    fn numeric_id_rejects_non_leading_digits() {
        assert_eq!(parse_numeric_id("abc"), Err(InvalidIdentifierFormat));
        assert_eq!(parse_numeric_id("x12"), Err(InvalidIdentifierFormat));
        assert_eq!(parse_numeric_id(""), Err(InvalidIdentifierFormat));
        assert_eq!(parse_numeric_id("0000"), Err(InvalidIdentifierFormat));
    }

    #[test]
    fn prefixed_id_extracts_from_anywhere() {
        assert_eq!(parse_prefixed_id("ID-4 tipo: llegada"), Ok(4));
        assert_eq!(parse_prefixed_id("falta ID-31"), Ok(31));
        assert_eq!(parse_prefixed_id("ID-007 resto"), Ok(7));
    }

    #[test]
    fn prefixed_id_rejects_missing_pattern() {
        assert_eq!(parse_prefixed_id("4"), Err(InvalidIdentifierFormat));
        assert_eq!(parse_prefixed_id("id-4"), Err(InvalidIdentifierFormat));
        assert_eq!(parse_prefixed_id("ID- 4"), Err(InvalidIdentifierFormat));
        assert_eq!(parse_prefixed_id("ID-0"), Err(InvalidIdentifierFormat));
        assert_eq!(parse_prefixed_id(""), Err(InvalidIdentifierFormat));
    }

    #[test]
    fn parent_text_splits_name_and_number() {
        let c = split_parent_text("benita rios 67894532").expect("candidate");
        assert_eq!(c.nombre, "Benita");
        assert_eq!(c.apellido, "Rios");
        assert_eq!(c.numero, "67894532");
    }

    #[test]
    fn parent_text_single_name_gets_sentinel_surname() {
        let c = split_parent_text("ana 12345").expect("candidate");
        assert_eq!(c.nombre, "Ana");
        assert_eq!(c.apellido, "N/A");
        assert_eq!(c.numero, "12345");
    }

    #[test]
    fn parent_text_last_token_is_number_even_when_not_numeric() {
        let c = split_parent_text("maria luisa perez").expect("candidate");
        assert_eq!(c.nombre, "Maria");
        assert_eq!(c.apellido, "Luisa");
        assert_eq!(c.numero, "perez");
    }

    #[test]
    fn parent_text_without_name_yields_no_candidate() {
        assert_eq!(split_parent_text(""), None);
        assert_eq!(split_parent_text("   "), None);
        // A lone number leaves no name tokens behind.
        assert_eq!(split_parent_text("67894532"), None);
    }

    #[test]
    fn course_text_splits_on_first_period() {
        let c = split_course_text("5 secun. Pedro Dominguez");
        assert_eq!(c.nombre, "5 secun");
        assert_eq!(c.nombre_asesor, "Pedro Dominguez");
    }

    #[test]
    fn course_text_without_period_defaults_advisor() {
        let c = split_course_text("only-name-no-period");
        assert_eq!(c.nombre, "only-name-no-period");
        assert_eq!(c.nombre_asesor, "Sin asignar");
    }

    #[test]
    fn course_text_lone_period_keeps_empty_name() {
        let c = split_course_text(".");
        assert_eq!(c.nombre, "");
        assert_eq!(c.nombre_asesor, "Sin asignar");
    }

    #[test]
    fn fixed_width_line_is_always_40_chars() {
        let cases = [
            ("Luis", "Gomez", "5 secun"),
            ("", "", ""),
            (
                "NombreMuyLargoQueSeCorta",
                "ApellidoExtremadamenteLargoQueSeCorta",
                "CursoConNombreLargo",
            ),
        ];
        for (n, a, c) in cases {
            let rec = encode_fixed_width(1, n, a, c);
            assert_eq!(rec.line.chars().count(), 40, "case {:?}", (n, a, c));
            // Encoding is deterministic.
            assert_eq!(rec, encode_fixed_width(1, n, a, c));
        }
    }

    #[test]
    fn fixed_width_pads_and_truncates_per_field() {
        let rec = encode_fixed_width(7, "Luis", "Gomez", "5 secun");
        assert_eq!(rec.id_field, "0007");
        assert_eq!(&rec.line[0..8], "Luis    ");
        assert_eq!(&rec.line[8..28], "Gomez               ");
        assert_eq!(&rec.line[28..40], "5 secun     ");

        let rec = encode_fixed_width(12345, "Maximiliano", "Gomez", "");
        assert_eq!(rec.id_field, "12345");
        assert_eq!(&rec.line[0..8], "Maximili");
    }

    #[test]
    fn parent_resolution_is_idempotent_without_concurrency() {
        let conn = test_conn();
        let c = split_parent_text("benita rios 67894532").expect("candidate");

        let first = resolve_or_create_parent(&conn, &c).expect("resolve");
        assert!(first.created);
        let second = resolve_or_create_parent(&conn, &c).expect("resolve again");
        assert!(!second.created);
        assert_eq!(first.id, second.id);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM padres", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn parent_match_requires_exact_number() {
        let conn = test_conn();
        let a = split_parent_text("benita rios 67894532").expect("candidate");
        let b = split_parent_text("benita rios 99999999").expect("candidate");

        let first = resolve_or_create_parent(&conn, &a).expect("resolve");
        let second = resolve_or_create_parent(&conn, &b).expect("resolve");
        assert!(second.created);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn parent_match_tolerates_longer_stored_name() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO padres(nombre, apellido, numero) VALUES('Ana Benita', 'Rios', '12345')",
            [],
        )
        .expect("seed");

        // "Benita" is contained in the stored "Ana Benita": substring recall.
        let c = split_parent_text("benita rios 12345").expect("candidate");
        let resolved = resolve_or_create_parent(&conn, &c).expect("resolve");
        assert!(!resolved.created);
        assert_eq!(resolved.id, 1);
    }

    #[test]
    fn course_resolution_reuses_substring_match() {
        let conn = test_conn();
        let c = split_course_text("5 secun. Pedro Dominguez");
        let first = resolve_or_create_course(&conn, &c).expect("resolve");
        assert!(first.created);

        let again = resolve_or_create_course(&conn, &split_course_text("5 secun"));
        let again = again.expect("resolve again");
        assert!(!again.created);
        assert_eq!(first.id, again.id);
    }

    #[test]
    fn empty_course_name_is_created_then_reused() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO cursos(nombre, nombre_asesor) VALUES('6 prim', 'Otro Asesor')",
            [],
        )
        .expect("seed");

        let c = split_course_text(".");
        let first = resolve_or_create_course(&conn, &c).expect("resolve");
        // Must not substring-match the seeded course; the empty name gets
        // its own row.
        assert!(first.created);

        let second = resolve_or_create_course(&conn, &c).expect("resolve again");
        assert!(!second.created);
        assert_eq!(first.id, second.id);
    }
}
