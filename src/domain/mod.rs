pub mod document;
pub mod embedding;
pub mod generation;
pub mod language_model;
pub mod records;
pub mod vector_repository;
