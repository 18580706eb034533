use crate::error::CResult;
use crate::wire::buffer::Buffer;

/// The 12-byte message header, trimmed to the fields mDNS actually uses: it
/// never recurses, so recursion/authentication/checking-disabled bits and
/// the response-code are not modeled, unlike a full unicast DNS header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub response: bool,
    pub opcode: u8,
    pub authoritative_answer: bool,
    pub truncated: bool,
    pub questions: u16,
    pub answers: u16,
    pub authorities: u16,
    pub resources: u16,
}

impl Header {
    pub fn read(buffer: &mut Buffer) -> CResult<Header> {
        let id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = ((flags >> 8) & 0xFF) as u8;
        let response = (a & (1 << 7)) != 0;
        let opcode = (a >> 3) & 0x0F;
        let authoritative_answer = (a & (1 << 2)) != 0;
        let truncated = (a & (1 << 1)) != 0;

        let questions = buffer.read_u16()?;
        let answers = buffer.read_u16()?;
        let authorities = buffer.read_u16()?;
        let resources = buffer.read_u16()?;

        Ok(Header {
            id,
            response,
            opcode,
            authoritative_answer,
            truncated,
            questions,
            answers,
            authorities,
            resources,
        })
    }

    pub fn write(&self, buffer: &mut Buffer) -> CResult<()> {
        buffer.write_u16(self.id)?;

        let a: u8 = ((self.response as u8) << 7)
            | (self.opcode << 3)
            | ((self.authoritative_answer as u8) << 2)
            | ((self.truncated as u8) << 1);
        let flags: u16 = (a as u16) << 8;
        buffer.write_u16(flags)?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authorities)?;
        buffer.write_u16(self.resources)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_response_and_counts() {
        let mut buf = Buffer::new(64);
        let header = Header {
            id: 0,
            response: true,
            opcode: 0,
            authoritative_answer: true,
            truncated: false,
            questions: 0,
            answers: 2,
            authorities: 1,
            resources: 0,
        };
        header.write(&mut buf).unwrap();
        buf.seek(0).unwrap();
        let parsed = Header::read(&mut buf).unwrap();
        assert_eq!(parsed, header);
    }
}
