mod flock;
mod ollama;

pub use flock::{FlockManager, SecretParams, SecretProvider};
pub use ollama::{DEFAULT_OLLAMA_HOST, OllamaClient, OllamaConfig};
