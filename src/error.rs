//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `ConvertError` enum per categorizzare tutti gli errori possibili
//! - Fornisce messaggi di errore descrittivi e strutturati
//! - Integra con `thiserror` per automatic error conversion
//! - Supporta error chaining per mantenere il contesto degli errori
//!
//! ## Categorie di errori:
//! - `Io`: Errori di I/O (file non trovati, permessi, etc.)
//! - `UnsupportedInput`: MIME/estensione sorgente non riconosciuta
//! - `MissingSource`: File sorgente inesistente
//! - `MissingDestination`: Directory di destinazione inesistente
//! - `Encode`: L'encoder esterno ha fallito o è terminato con errore
//! - `QuotaExceeded`: Admission negata dal quota gate
//! - `Probe`: Errori durante il probing delle capability
//! - `State`: Errori di gestione dei ledger persistenti
//!
//! ## Nota:
//! L'assenza di un processor NON è un errore: il probe la riporta come
//! capability fact (`None`). Solo le chiamate strutturalmente invalide
//! producono errori immediati.

/// Custom error types for the conversion and delivery pipeline
#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Source file does not exist: {0}")]
    MissingSource(String),

    #[error("Destination directory does not exist: {0}")]
    MissingDestination(String),

    #[error("Encode failure: {0}")]
    Encode(String),

    #[error("Conversion quota exceeded for {0}")]
    QuotaExceeded(String),

    #[error("Capability probe error: {0}")]
    Probe(String),

    #[error("Ledger state error: {0}")]
    State(String),
}
