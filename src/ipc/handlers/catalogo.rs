use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_cursos_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare("SELECT id, nombre, nombre_asesor FROM cursos ORDER BY id") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let nombre: String = row.get(1)?;
            let nombre_asesor: String = row.get(2)?;
            Ok(json!({
                "id": id,
                "nombre": nombre,
                "nombreAsesor": nombre_asesor
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(cursos) => ok(&req.id, json!({ "cursos": cursos })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_padres_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn
        .prepare("SELECT id, nombre, apellido, numero, user_id FROM padres ORDER BY id")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let nombre: String = row.get(1)?;
            let apellido: String = row.get(2)?;
            let numero: String = row.get(3)?;
            let user_id: Option<i64> = row.get(4)?;
            Ok(json!({
                "id": id,
                "nombre": nombre,
                "apellido": apellido,
                "numero": numero,
                "userId": user_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(padres) => ok(&req.id, json!({ "padres": padres })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cursos.list" => Some(handle_cursos_list(state, req)),
        "padres.list" => Some(handle_padres_list(state, req)),
        _ => None,
    }
}
