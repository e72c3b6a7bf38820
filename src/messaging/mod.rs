// Messaging - Queue crossing the capture-thread / poll-loop boundary

pub mod channels;

pub use channels::{NoteConsumer, NoteProducer, create_note_channel};
