use crate::error::CResult;
use crate::wire::buffer::Buffer;
use crate::wire::header::Header;
use crate::wire::record::{estimated_rr_size, Question, WireRecord};

/// A fully parsed mDNS message: header plus the four sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<WireRecord>,
    pub authorities: Vec<WireRecord>,
    pub resources: Vec<WireRecord>,
}

impl Message {
    pub fn from_buffer(buffer: &mut Buffer) -> CResult<Message> {
        let header = Header::read(buffer)?;

        let mut questions = Vec::with_capacity(header.questions as usize);
        for _ in 0..header.questions {
            questions.push(Question::read(buffer)?);
        }

        let mut answers = Vec::with_capacity(header.answers as usize);
        for _ in 0..header.answers {
            answers.push(WireRecord::read(buffer)?);
        }

        let mut authorities = Vec::with_capacity(header.authorities as usize);
        for _ in 0..header.authorities {
            authorities.push(WireRecord::read(buffer)?);
        }

        let mut resources = Vec::with_capacity(header.resources as usize);
        for _ in 0..header.resources {
            resources.push(WireRecord::read(buffer)?);
        }

        Ok(Message {
            header,
            questions,
            answers,
            authorities,
            resources,
        })
    }
}

/// Incrementally builds an outgoing message, tracking section counts and the
/// current wire length so the emit pipeline can stop adding records before
/// overflowing the configured frame, instead of writing past it and finding
/// out on the next read.
pub struct MessageBuilder {
    buffer: Buffer,
    header: Header,
}

impl MessageBuilder {
    pub fn new(frame: usize) -> Self {
        let mut buffer = Buffer::new(frame);
        // Header is patched in on `finish`; reserve its 12 bytes up front so
        // section writes start at the right offset.
        buffer.seek(12).expect("frame smaller than a header");
        MessageBuilder {
            buffer,
            header: Header::default(),
        }
    }

    pub fn set_response(&mut self, response: bool, authoritative: bool) {
        self.header.response = response;
        self.header.authoritative_answer = authoritative;
    }

    pub fn set_id(&mut self, id: u16) {
        self.header.id = id;
    }

    pub fn current_length(&self) -> usize {
        self.buffer.pos()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Whether `estimated_rr_size(resource)` more bytes would still fit
    /// before the configured frame limit.
    pub fn fits(&self, resource: &crate::resource::Resource) -> bool {
        self.current_length() + estimated_rr_size(resource) <= self.capacity()
    }

    pub fn add_question(&mut self, question: &Question) -> CResult<()> {
        question.write(&mut self.buffer)?;
        self.header.questions += 1;
        Ok(())
    }

    pub fn add_answer(&mut self, record: &WireRecord) -> CResult<()> {
        record.write(&mut self.buffer)?;
        self.header.answers += 1;
        Ok(())
    }

    pub fn add_authority(&mut self, record: &WireRecord) -> CResult<()> {
        record.write(&mut self.buffer)?;
        self.header.authorities += 1;
        Ok(())
    }

    /// Finalizes the header and returns the written bytes.
    pub fn finish(mut self) -> CResult<Vec<u8>> {
        let end = self.buffer.pos();
        self.buffer.seek(0)?;
        self.header.write(&mut self.buffer)?;
        self.buffer.seek(end)?;
        Ok(self.buffer.buf[..end].to_vec())
    }
}
