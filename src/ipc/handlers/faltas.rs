use crate::intake;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use tracing::info;

fn handle_faltas_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT f.id, f.descripcion, f.estado, f.fecha,
                t.nombre, s.descripcion,
                e.id, e.nombre, e.apellido, c.nombre
         FROM faltas_graves f
         JOIN tipos_falta t ON t.id = f.tipo_falta_id
         LEFT JOIN sanciones s ON s.id = t.sancion_id
         JOIN estudiantes e ON e.id = f.estudiante_id
         LEFT JOIN cursos c ON c.id = e.curso_id
         ORDER BY f.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let descripcion: String = row.get(1)?;
            let estado: String = row.get(2)?;
            let fecha: String = row.get(3)?;
            let tipo_falta_nombre: String = row.get(4)?;
            let sancion_descripcion: Option<String> = row.get(5)?;
            let estudiante_id: i64 = row.get(6)?;
            let estudiante_nombre: String = row.get(7)?;
            let estudiante_apellido: String = row.get(8)?;
            let curso_nombre: Option<String> = row.get(9)?;
            Ok(json!({
                "id": id,
                "descripcion": descripcion,
                "estado": estado,
                "fecha": fecha,
                "tipoFaltaNombre": tipo_falta_nombre,
                "sancionDescripcion": sancion_descripcion,
                "estudiante": {
                    "id": estudiante_id,
                    "nombre": estudiante_nombre,
                    "apellido": estudiante_apellido,
                    "cursoNombre": curso_nombre
                }
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(faltas) => ok(&req.id, json!({ "faltas": faltas })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_faltas_sancionar(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let id_text = match req.params.get("idEstudiante").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing idEstudiante", None),
    };
    let tipo_falta = match req.params.get("tipoFalta").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing tipoFalta", None),
    };

    let estudiante_id = match intake::parse_numeric_id(id_text) {
        Ok(v) => v,
        Err(_) => {
            return err(
                &req.id,
                "invalid_id_format",
                "idEstudiante must be a numeric token like \"0007\"",
                None,
            )
        }
    };

    let estudiante_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM estudiantes WHERE id = ?",
            [estudiante_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if estudiante_exists.is_none() {
        return err(&req.id, "not_found", "estudiante not found", None);
    }

    // Falta types are matched by exact name; the taxonomy is fixed.
    let tipo: Option<(i64, String)> = match conn
        .query_row(
            "SELECT id, nombre FROM tipos_falta WHERE nombre = ?",
            [tipo_falta],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((tipo_id, tipo_nombre)) = tipo else {
        return err(&req.id, "not_found", "tipo de falta not found", None);
    };

    let descripcion = format!("Falta por {}", tipo_nombre.to_lowercase());
    let fecha = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO faltas_graves(tipo_falta_id, estudiante_id, descripcion, estado, fecha)
         VALUES(?1, ?2, ?3, 'pendiente', ?4)",
        (tipo_id, estudiante_id, &descripcion, &fecha),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "faltas_graves" })),
        );
    }
    let falta_id = conn.last_insert_rowid();
    info!(falta_id, estudiante_id, "sanción registrada");

    // Reload with relations so the caller gets the full picture.
    let detail = conn
        .query_row(
            "SELECT s.descripcion, e.nombre, e.apellido, c.nombre
             FROM faltas_graves f
             JOIN tipos_falta t ON t.id = f.tipo_falta_id
             LEFT JOIN sanciones s ON s.id = t.sancion_id
             JOIN estudiantes e ON e.id = f.estudiante_id
             LEFT JOIN cursos c ON c.id = e.curso_id
             WHERE f.id = ?",
            [falta_id],
            |r| {
                let sancion: Option<String> = r.get(0)?;
                let nombre: String = r.get(1)?;
                let apellido: String = r.get(2)?;
                let curso: Option<String> = r.get(3)?;
                Ok((sancion, nombre, apellido, curso))
            },
        );
    let (sancion_descripcion, est_nombre, est_apellido, curso_nombre) = match detail {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "faltaId": falta_id,
            "descripcion": descripcion,
            "estado": "pendiente",
            "fecha": fecha,
            "tipoFaltaNombre": tipo_nombre,
            "sancionDescripcion": sancion_descripcion,
            "estudiante": {
                "id": estudiante_id,
                "nombre": est_nombre,
                "apellido": est_apellido,
                "cursoNombre": curso_nombre
            }
        }),
    )
}

fn handle_faltas_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let texto = match req.params.get("texto").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing texto", None),
    };

    let falta_id = match intake::parse_prefixed_id(texto) {
        Ok(v) => v,
        Err(_) => {
            return err(
                &req.id,
                "invalid_id_format",
                "texto must contain a token like \"ID-4 tipo: llegada\"",
                None,
            )
        }
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM faltas_graves WHERE id = ?", [falta_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "falta not found", None);
    }

    if let Err(e) = conn.execute("DELETE FROM faltas_graves WHERE id = ?", [falta_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "faltas_graves" })),
        );
    }
    info!(falta_id, "falta eliminada");

    ok(&req.id, json!({ "deletedId": falta_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faltas.list" => Some(handle_faltas_list(state, req)),
        "faltas.sancionar" => Some(handle_faltas_sancionar(state, req)),
        "faltas.delete" => Some(handle_faltas_delete(state, req)),
        _ => None,
    }
}
