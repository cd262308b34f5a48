pub mod llm {
    use thiserror::Error;

    /// Observer for incremental output. `generate` calls `on_fragment` once
    /// per decoded chunk, in arrival order, before the full response is known.
    /// Emission is a side effect only; the accumulated return value is
    /// authoritative.
    pub trait Progress: Send {
        fn on_fragment(&mut self, fragment: &str);
    }

    impl<F> Progress for F
    where
        F: FnMut(&str) + Send,
    {
        fn on_fragment(&mut self, fragment: &str) {
            self(fragment)
        }
    }

    #[derive(Error, Debug)]
    pub enum ModelError {
        #[error("generation timed out after {attempts} attempts; check service load or raise the timeout")]
        Timeout { attempts: u32 },
        #[error("model endpoint unreachable: {0}")]
        Unreachable(String),
        #[error("model endpoint returned 404; service is not responding")]
        EndpointNotResponding,
        #[error("request failed: {0}")]
        RequestFailed(String),
        #[error("unknown model: {0}")]
        UnknownModel(String),
    }

    #[allow(async_fn_in_trait)]
    pub trait ModelClient {
        /// One complete generation for one prompt against the active model.
        /// Decoded fragments are mirrored to `progress` as they arrive.
        async fn generate(
            &self,
            prompt: &str,
            progress: &mut dyn Progress,
        ) -> Result<String, ModelError>;

        /// Configured model names. Never fails; an unreadable or empty
        /// configuration yields an empty list.
        fn list_models(&self) -> Vec<String>;

        /// Swap the active model selection wholesale. `UnknownModel` leaves
        /// the previous selection untouched.
        fn set_model(&mut self, name: &str) -> Result<(), ModelError>;
    }
}

pub mod analysis;
pub mod optimizer;
