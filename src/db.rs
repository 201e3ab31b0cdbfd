use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("escuela.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cursos(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nombre TEXT NOT NULL,
            nombre_asesor TEXT NOT NULL DEFAULT 'Sin asignar'
        )",
        [],
    )?;
    // Intended dedup key for curso resolution. Lookups still run a substring
    // match first; the index only guards the create path (insert-if-absent).
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_cursos_nombre ON cursos(nombre)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS padres(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nombre TEXT NOT NULL,
            apellido TEXT NOT NULL DEFAULT 'N/A',
            numero TEXT NOT NULL DEFAULT 'N/A',
            user_id INTEGER
        )",
        [],
    )?;
    ensure_padres_user_id(&conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_padres_nombre_numero ON padres(nombre, numero)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS estudiantes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nombre TEXT NOT NULL,
            apellido TEXT NOT NULL,
            numero TEXT NOT NULL,
            curso_id INTEGER,
            padre_id INTEGER,
            FOREIGN KEY(curso_id) REFERENCES cursos(id),
            FOREIGN KEY(padre_id) REFERENCES padres(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_estudiantes_curso ON estudiantes(curso_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_estudiantes_padre ON estudiantes(padre_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sanciones(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            descripcion TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tipos_falta(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nombre TEXT NOT NULL,
            sancion_id INTEGER,
            FOREIGN KEY(sancion_id) REFERENCES sanciones(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS faltas_graves(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tipo_falta_id INTEGER NOT NULL,
            estudiante_id INTEGER NOT NULL,
            descripcion TEXT NOT NULL,
            estado TEXT NOT NULL DEFAULT 'pendiente',
            fecha TEXT NOT NULL,
            FOREIGN KEY(tipo_falta_id) REFERENCES tipos_falta(id),
            FOREIGN KEY(estudiante_id) REFERENCES estudiantes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_faltas_estudiante ON faltas_graves(estudiante_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_faltas_tipo ON faltas_graves(tipo_falta_id)",
        [],
    )?;

    seed_taxonomy(&conn)?;

    Ok(conn)
}

/// The sanction taxonomy is assumed to exist before any falta is recorded.
/// Fresh workspaces get the standard catalogue; non-empty tables are left alone.
fn seed_taxonomy(conn: &Connection) -> anyhow::Result<()> {
    let tipo_count: i64 = conn.query_row("SELECT COUNT(*) FROM tipos_falta", [], |r| r.get(0))?;
    if tipo_count > 0 {
        return Ok(());
    }

    let catalogue = [
        ("Llegada tardía", "Llamada de atención verbal"),
        ("Inasistencia", "Citación al padre de familia"),
        ("Agresión", "Suspensión de un día"),
        ("Fuga", "Suspensión de tres días"),
    ];

    for (tipo, sancion) in catalogue {
        conn.execute(
            "INSERT INTO sanciones(descripcion) VALUES(?)",
            [sancion],
        )?;
        let sancion_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO tipos_falta(nombre, sancion_id) VALUES(?, ?)",
            (tipo, sancion_id),
        )?;
    }

    Ok(())
}

fn ensure_padres_user_id(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate the owning-user column. Add it if missing.
    if table_has_column(conn, "padres", "user_id")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE padres ADD COLUMN user_id INTEGER", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
