use crate::intake;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::{info, warn};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(code: &'static str, e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

const MAX_NOMBRE: usize = 100;
const MAX_APELLIDO: usize = 100;
const MAX_NUMERO: usize = 20;

fn required_field(
    params: &serde_json::Value,
    key: &str,
    max_len: usize,
) -> Result<String, HandlerErr> {
    let value = params
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if value.is_empty() {
        return Err(HandlerErr {
            code: "validation_failed",
            message: format!("{} is required", key),
            details: Some(json!({ "field": key })),
        });
    }
    if value.chars().count() > max_len {
        return Err(HandlerErr {
            code: "validation_failed",
            message: format!("{} must be at most {} characters", key, max_len),
            details: Some(json!({ "field": key, "max": max_len })),
        });
    }
    Ok(value.to_string())
}

fn handle_estudiantes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, e.nombre, e.apellido, e.numero, e.curso_id, e.padre_id,
                c.nombre, p.nombre, p.apellido
         FROM estudiantes e
         LEFT JOIN cursos c ON c.id = e.curso_id
         LEFT JOIN padres p ON p.id = e.padre_id
         ORDER BY e.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let nombre: String = row.get(1)?;
            let apellido: String = row.get(2)?;
            let numero: String = row.get(3)?;
            let curso_id: Option<i64> = row.get(4)?;
            let padre_id: Option<i64> = row.get(5)?;
            let curso_nombre: Option<String> = row.get(6)?;
            let padre_nombre: Option<String> = row.get(7)?;
            let padre_apellido: Option<String> = row.get(8)?;

            // The listing exposes a missing curso as "", not null.
            let curso_nombre = curso_nombre.unwrap_or_default();
            let nombre_padre = padre_nombre
                .map(|n| format!("{} {}", n, padre_apellido.unwrap_or_default()));
            let fixed = intake::encode_fixed_width(id, &nombre, &apellido, &curso_nombre);

            Ok(json!({
                "id": id,
                "idFormateado": fixed.id_field,
                "nombre": nombre,
                "apellido": apellido,
                "numero": numero,
                "cursoId": curso_id,
                "padreId": padre_id,
                "cursoNombre": curso_nombre,
                "nombrePadre": nombre_padre,
                "formatoFijo": fixed.line
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(estudiantes) => ok(&req.id, json!({ "estudiantes": estudiantes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn load_faltas(conn: &Connection, estudiante_id: i64) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT f.id, f.descripcion, f.estado, f.fecha, t.nombre, s.descripcion
             FROM faltas_graves f
             JOIN tipos_falta t ON t.id = f.tipo_falta_id
             LEFT JOIN sanciones s ON s.id = t.sancion_id
             WHERE f.estudiante_id = ?
             ORDER BY f.id",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    stmt.query_map([estudiante_id], |row| {
        let id: i64 = row.get(0)?;
        let descripcion: String = row.get(1)?;
        let estado: String = row.get(2)?;
        let fecha: String = row.get(3)?;
        let tipo_falta_nombre: String = row.get(4)?;
        let sancion_descripcion: Option<String> = row.get(5)?;
        Ok(json!({
            "id": id,
            "descripcion": descripcion,
            "estado": estado,
            "fecha": fecha,
            "tipoFaltaNombre": tipo_falta_nombre,
            "sancionDescripcion": sancion_descripcion
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| db_err("db_query_failed", e))
}

fn estudiantes_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let id_text = req
        .params
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing id".to_string(),
            details: None,
        })?;

    let estudiante_id = intake::parse_numeric_id(id_text).map_err(|_| HandlerErr {
        code: "invalid_id_format",
        message: "id must be a numeric token like \"0007\"".to_string(),
        details: None,
    })?;

    let row = conn
        .query_row(
            "SELECT e.nombre, e.apellido, e.numero, e.curso_id, e.padre_id,
                    c.nombre, p.nombre, p.apellido
             FROM estudiantes e
             LEFT JOIN cursos c ON c.id = e.curso_id
             LEFT JOIN padres p ON p.id = e.padre_id
             WHERE e.id = ?",
            [estudiante_id],
            |row| {
                let nombre: String = row.get(0)?;
                let apellido: String = row.get(1)?;
                let numero: String = row.get(2)?;
                let curso_id: Option<i64> = row.get(3)?;
                let padre_id: Option<i64> = row.get(4)?;
                let curso_nombre: Option<String> = row.get(5)?;
                let padre_nombre: Option<String> = row.get(6)?;
                let padre_apellido: Option<String> = row.get(7)?;
                Ok((
                    nombre,
                    apellido,
                    numero,
                    curso_id,
                    padre_id,
                    curso_nombre,
                    padre_nombre,
                    padre_apellido,
                ))
            },
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;

    let Some((nombre, apellido, numero, curso_id, padre_id, curso_nombre, padre_nombre, padre_apellido)) =
        row
    else {
        return Err(HandlerErr {
            code: "not_found",
            message: "estudiante not found".to_string(),
            details: None,
        });
    };

    let faltas = load_faltas(conn, estudiante_id)?;
    let nombre_padre =
        padre_nombre.map(|n| format!("{} {}", n, padre_apellido.unwrap_or_default()));

    Ok(json!({
        "id": estudiante_id,
        "nombre": nombre,
        "apellido": apellido,
        "numero": numero,
        "cursoId": curso_id,
        "padreId": padre_id,
        "cursoNombre": curso_nombre,
        "nombrePadre": nombre_padre,
        "faltas": faltas
    }))
}

/// The intake pipeline: split the loose parent/course text, resolve or
/// create each entity, validate the student fields, insert the student.
/// Parent and course rows created before a validation failure are kept
/// (no rollback); the failure is logged so operators can see the orphans.
fn estudiantes_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let padre = match req.params.get("padreDatos").and_then(|v| v.as_str()) {
        Some(text) if !text.trim().is_empty() => match intake::split_parent_text(text) {
            Some(candidate) => Some(
                intake::resolve_or_create_parent(conn, &candidate)
                    .map_err(|e| db_err("db_insert_failed", e))?,
            ),
            None => None,
        },
        _ => None,
    };

    let curso = match req.params.get("cursoDatos").and_then(|v| v.as_str()) {
        Some(text) if !text.trim().is_empty() => {
            let candidate = intake::split_course_text(text);
            Some(
                intake::resolve_or_create_course(conn, &candidate)
                    .map_err(|e| db_err("db_insert_failed", e))?,
            )
        }
        _ => None,
    };

    let validated = required_field(&req.params, "nombre", MAX_NOMBRE)
        .and_then(|nombre| {
            required_field(&req.params, "apellido", MAX_APELLIDO).map(|a| (nombre, a))
        })
        .and_then(|(nombre, apellido)| {
            required_field(&req.params, "numero", MAX_NUMERO).map(|n| (nombre, apellido, n))
        });
    let (nombre, apellido, numero) = match validated {
        Ok(v) => v,
        Err(e) => {
            if padre.map(|r| r.created).unwrap_or(false)
                || curso.map(|r| r.created).unwrap_or(false)
            {
                warn!(
                    padre_id = padre.map(|r| r.id),
                    curso_id = curso.map(|r| r.id),
                    "validación de estudiante falló; padre/curso creados quedan huérfanos"
                );
            }
            return Err(e);
        }
    };

    conn.execute(
        "INSERT INTO estudiantes(nombre, apellido, numero, curso_id, padre_id)
         VALUES(?1, ?2, ?3, ?4, ?5)",
        (
            &nombre,
            &apellido,
            &numero,
            curso.map(|r| r.id),
            padre.map(|r| r.id),
        ),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;
    let estudiante_id = conn.last_insert_rowid();
    info!(estudiante_id, "estudiante creado");

    Ok(json!({
        "status": "created",
        "estudianteId": estudiante_id,
        "padreId": padre.map(|r| r.id),
        "cursoId": curso.map(|r| r.id),
        "padreCreado": padre.map(|r| r.created).unwrap_or(false),
        "cursoCreado": curso.map(|r| r.created).unwrap_or(false)
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Request) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "estudiantes.list" => Some(handle_estudiantes_list(state, req)),
        "estudiantes.get" => Some(with_conn(state, req, estudiantes_get)),
        "estudiantes.create" => Some(with_conn(state, req, estudiantes_create)),
        _ => None,
    }
}
