pub mod assemblyai;
pub mod feedback;
pub mod transcription;
pub mod whisper;

pub use assemblyai::AssemblyAiProvider;
pub use feedback::{
    ChatCompletionsProvider, CoachResponse, FallbackChain, FallbackExhausted, FeedbackProvider,
    MockFeedbackProvider,
};
pub use transcription::{
    MockTranscriptionProvider, PollStatus, ProviderError, StartedTranscription, TranscriptResult,
    TranscriptionProvider,
};
pub use whisper::WhisperProvider;
