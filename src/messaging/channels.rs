// Communication channels lock-free
// Single producer (capture thread) / single consumer (poll loop)

use crate::midi::event::NoteEvent;
use ringbuf::{HeapRb, traits::Split};

pub type NoteProducer = ringbuf::HeapProd<NoteEvent>;
pub type NoteConsumer = ringbuf::HeapCons<NoteEvent>;

pub fn create_note_channel(capacity: usize) -> (NoteProducer, NoteConsumer) {
    let rb = HeapRb::<NoteEvent>::new(capacity.max(1));
    rb.split()
}
