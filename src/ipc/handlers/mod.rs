pub mod catalogo;
pub mod core;
pub mod estudiantes;
pub mod faltas;
