use crate::descriptor::{Descriptor, SIZE_OF_LENGTH_FIELD};
use crate::diskio::file::{SpillFile, SpillReader};
use crate::error::{Result, UniqueError};
use crate::record::ElementCount;

const COUNTER_SIZE: usize = std::mem::size_of::<ElementCount>();

/// One sorted run inside the shared spill file. The file itself carries no
/// run boundaries; this is the only record of where a run lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    start_bytes: u64,
    total_bytes: u64,
    total_entries: u64,
}

impl Run {
    pub fn start_offset(&self) -> u64 {
        self.start_bytes
    }

    pub fn byte_range(&self) -> (u64, u64) {
        (self.start_bytes, self.start_bytes + self.total_bytes)
    }

    pub fn total_entries(&self) -> u64 {
        self.total_entries
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Record framing: `[key bytes][count: u64 LE, when counters are on]`.
/// Variable keys bring their own length prefix inside the key bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunFormat {
    pub with_counters: bool,
}

impl RunFormat {
    pub fn counter_size(&self) -> usize {
        if self.with_counters { COUNTER_SIZE } else { 0 }
    }
}

/// Appends one run's records at the current end of the spill file.
pub struct RunWriter<'a> {
    file: &'a mut SpillFile,
    format: RunFormat,
    run: Run,
}

impl<'a> RunWriter<'a> {
    pub fn start(file: &'a mut SpillFile, format: RunFormat) -> Self {
        let start_bytes = file.position();
        Self {
            file,
            format,
            run: Run {
                start_bytes,
                total_bytes: 0,
                total_entries: 0,
            },
        }
    }

    pub fn append(&mut self, key: &[u8], count: ElementCount) -> Result<()> {
        self.file.write_all(key)?;
        if self.format.with_counters {
            self.file.write_all(&count.to_le_bytes())?;
        }
        self.run.total_bytes += (key.len() + self.format.counter_size()) as u64;
        self.run.total_entries += 1;
        Ok(())
    }

    pub fn finish(self) -> Run {
        self.run
    }
}

/// Streams a run back through a bounded read buffer.
pub struct RunReader<'a> {
    file: &'a SpillReader,
    descriptor: &'a Descriptor,
    format: RunFormat,
    run: Run,
    buffer_size: usize,
    buf: Vec<u8>,
    pos: usize,
    next_offset: u64,
    entries_read: u64,
}

impl<'a> RunReader<'a> {
    pub fn new(
        file: &'a SpillReader,
        descriptor: &'a Descriptor,
        format: RunFormat,
        run: Run,
        buffer_size: usize,
    ) -> Self {
        Self {
            file,
            descriptor,
            format,
            run,
            buffer_size: buffer_size.max(1),
            buf: Vec::new(),
            pos: 0,
            next_offset: run.start_bytes,
            entries_read: 0,
        }
    }

    // Makes at least `need` unread bytes available. False when the run
    // has fewer bytes than that left.
    fn fill(&mut self, need: usize) -> Result<bool> {
        if self.buf.len() - self.pos >= need {
            return Ok(true);
        }
        self.buf.drain(..self.pos);
        self.pos = 0;

        let (_, end) = self.run.byte_range();
        let remaining = (end - self.next_offset) as usize;
        let want = self
            .buffer_size
            .max(need)
            .saturating_sub(self.buf.len())
            .min(remaining);
        if want > 0 {
            let old_len = self.buf.len();
            self.buf.try_reserve(want)?;
            self.buf.resize(old_len + want, 0);
            let n = self.file.read_at(&mut self.buf[old_len..], self.next_offset)?;
            self.buf.truncate(old_len + n);
            self.next_offset += n as u64;
        }
        Ok(self.buf.len() >= need)
    }

    fn corrupt(&self) -> UniqueError {
        UniqueError::CorruptRun {
            offset: self.run.start_bytes,
        }
    }

    pub fn next_record(&mut self) -> Result<Option<(Vec<u8>, ElementCount)>> {
        if self.entries_read == self.run.total_entries {
            return Ok(None);
        }

        // Enough bytes to decode the key length
        let head = if self.descriptor.is_variable_sized() {
            SIZE_OF_LENGTH_FIELD
        } else {
            0
        };
        if !self.fill(head)? {
            return Err(self.corrupt());
        }
        let key_len = self.descriptor.get_length_of_key(&self.buf[self.pos..]);
        let record_len = key_len + self.format.counter_size();
        if !self.fill(record_len)? {
            return Err(self.corrupt());
        }

        let record = &self.buf[self.pos..self.pos + record_len];
        let key = record[..key_len].to_vec();
        let count = if self.format.with_counters {
            let mut raw = [0u8; COUNTER_SIZE];
            raw.copy_from_slice(&record[key_len..]);
            ElementCount::from_le_bytes(raw)
        } else {
            1
        };

        self.pos += record_len;
        self.entries_read += 1;
        Ok(Some((key, count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldDef;

    fn spill_file() -> SpillFile {
        SpillFile::create_in(None, 64).unwrap()
    }

    fn read_all(
        file: &mut SpillFile,
        desc: &Descriptor,
        format: RunFormat,
        run: Run,
        buffer_size: usize,
    ) -> Vec<(Vec<u8>, ElementCount)> {
        let spill = file.reader().unwrap();
        let mut reader = RunReader::new(&spill, desc, format, run, buffer_size);
        let mut out = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn test_fixed_keys_with_counters() {
        let desc = Descriptor::fixed(8);
        let format = RunFormat { with_counters: true };
        let mut file = spill_file();

        let mut writer = RunWriter::start(&mut file, format);
        for i in 0u64..100 {
            writer.append(&i.to_be_bytes(), i + 1).unwrap();
        }
        let run = writer.finish();
        file.flush().unwrap();

        assert_eq!(run.start_offset(), 0);
        assert_eq!(run.total_entries(), 100);
        assert_eq!(run.total_bytes(), 100 * 16);

        // Buffer smaller than one record forces a refill per field
        let records = read_all(&mut file, &desc, format, run, 5);
        assert_eq!(records.len(), 100);
        for (i, (key, count)) in records.iter().enumerate() {
            assert_eq!(key, &(i as u64).to_be_bytes());
            assert_eq!(*count, i as u64 + 1);
        }
    }

    #[test]
    fn test_variable_keys_without_counters() {
        let mut desc = Descriptor::variable(0);
        desc.setup_for_field(&FieldDef::variable(0, 64)).unwrap();
        let format = RunFormat { with_counters: false };
        let mut file = spill_file();

        let values = ["", "a", "bb", "a much longer value that spans buffers"];
        let mut keys = Vec::new();
        let mut writer = RunWriter::start(&mut file, format);
        for value in values {
            let row = vec![Some(value.as_bytes().to_vec())];
            desc.make_packed_record(&row, false).unwrap();
            let key = desc.packed_record().unwrap().to_vec();
            writer.append(&key, 1).unwrap();
            keys.push(key);
        }
        let run = writer.finish();
        file.flush().unwrap();

        let records = read_all(&mut file, &desc, format, run, 7);
        let read_keys: Vec<_> = records.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(read_keys, keys);
        assert!(records.iter().all(|(_, c)| *c == 1));
    }

    #[test]
    fn test_runs_share_one_file() {
        let desc = Descriptor::fixed(2);
        let format = RunFormat { with_counters: false };
        let mut file = spill_file();

        let mut writer = RunWriter::start(&mut file, format);
        writer.append(b"aa", 1).unwrap();
        writer.append(b"bb", 1).unwrap();
        let first = writer.finish();

        let mut writer = RunWriter::start(&mut file, format);
        writer.append(b"ab", 1).unwrap();
        let second = writer.finish();
        file.flush().unwrap();

        assert_eq!(first.byte_range(), (0, 4));
        assert_eq!(second.byte_range(), (4, 6));
        assert_eq!(read_all(&mut file, &desc, format, second, 64), vec![(b"ab".to_vec(), 1)]);
        assert_eq!(read_all(&mut file, &desc, format, first, 64).len(), 2);
    }

    #[test]
    fn test_truncated_run_is_reported() {
        let desc = Descriptor::fixed(4);
        let format = RunFormat { with_counters: false };
        let mut file = spill_file();
        let mut writer = RunWriter::start(&mut file, format);
        writer.append(b"abcd", 1).unwrap();
        let mut run = writer.finish();
        file.flush().unwrap();

        // Claim one more record than the bytes hold
        run.total_entries = 2;
        run.total_bytes = 6;
        let spill = file.reader().unwrap();
        let mut reader = RunReader::new(&spill, &desc, format, run, 16);
        assert!(reader.next_record().unwrap().is_some());
        assert!(matches!(
            reader.next_record(),
            Err(UniqueError::CorruptRun { offset: 0 })
        ));
    }
}
