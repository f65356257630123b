//! Memory event traces.
//!
//! A trace is a magic, followed by a header and a sequence of fixed-size records,
//! each either a memory access or a thread start.

// Imports
use {
	anyhow::Context,
	byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
	numaprof_util::ReadByteArray,
	std::io,
};

/// Trace reader
#[derive(Clone, Debug)]
pub struct TraceReader<R> {
	/// Header
	header: Header,

	/// Records remaining
	records_remaining: u64,

	/// Reader
	reader: R,
}

impl<R: io::Read + io::Seek> TraceReader<R> {
	/// Parses a trace from a reader
	pub fn from_reader(mut reader: R) -> Result<Self, anyhow::Error> {
		// Read the magic
		let magic = reader.read_byte_array().context("Unable to read magic")?;
		anyhow::ensure!(magic == MAGIC, "Found wrong magic {magic:?}, expected {MAGIC:?}",);

		// Read the header
		let header = Header::from_reader(&mut reader).context("Unable to read header")?;
		tracing::trace!(?header, "Parsed header");

		// Then check how many records are actually present
		let total_records = {
			let records_start = reader.stream_position().context("Unable to get stream position")?;
			let total_size = reader.seek(io::SeekFrom::End(0)).context("Unable to seek to end")?;
			reader
				.seek(io::SeekFrom::Start(records_start))
				.context("Unable to seek back to records")?;

			// Note: Seeking over the header padding succeeds even past the end, so
			//       a truncated header only shows up here.
			anyhow::ensure!(
				total_size >= records_start,
				"Trace is too short for its header: {total_size} bytes, expected at least {records_start}"
			);

			let record_size = Record::BYTE_SIZE as u64;
			let records_size = total_size - records_start;
			let actual_records = records_size / record_size;
			if actual_records != header.records || records_size % record_size != 0 {
				tracing::warn!(
					"Trace size differs from expected. Found {} bytes of records, expected {}",
					records_size,
					header.records.saturating_mul(record_size)
				);
			}

			actual_records
		};

		Ok(Self {
			header,
			records_remaining: total_records,
			reader,
		})
	}
}

impl<R: io::Read> TraceReader<R> {
	/// Reads the next record
	pub fn read_next(&mut self) -> Result<Option<Record>, anyhow::Error> {
		// If we're done, return `None`
		if self.records_remaining == 0 {
			return Ok(None);
		}

		// Else parse the next record and reduce the remaining records
		let record = Record::from_reader(&mut self.reader).context("Unable to read record")?;
		self.records_remaining -= 1;

		Ok(Some(record))
	}

	/// Returns the remaining records
	pub fn records_remaining(&self) -> u64 {
		self.records_remaining
	}

	/// Returns the header
	pub fn header(&self) -> &Header {
		&self.header
	}
}

/// Trace writer
#[derive(Clone, Debug)]
pub struct TraceWriter<W> {
	/// Records written
	records_written: u64,

	/// Thread starts written
	threads_written: u64,

	/// Writer
	writer: W,
}

impl<W: io::Write + io::Seek> TraceWriter<W> {
	/// Creates a new writer
	pub fn new(mut writer: W) -> Result<Self, anyhow::Error> {
		// Write the magic
		// Note: We rewind to ensure we write at the start, because we then
		//       later come back to write the header
		writer.rewind().context("Unable to rewind to start")?;
		writer.write_all(&MAGIC).context("Unable to write magic")?;

		// Skip over the header
		writer
			.seek(io::SeekFrom::Current(Header::BYTE_SIZE as i64))
			.context("Unable to seek past header")?;

		Ok(Self {
			records_written: 0,
			threads_written: 0,
			writer,
		})
	}

	/// Writes a record
	pub fn write(&mut self, record: &Record) -> Result<(), anyhow::Error> {
		record.to_writer(&mut self.writer).context("Unable to write record")?;

		self.records_written += 1;
		if let Record::ThreadStart { .. } = record {
			self.threads_written += 1;
		}
		Ok(())
	}

	/// Finishes writing
	pub fn finish(mut self) -> Result<W, anyhow::Error> {
		// Rewind the writer and write the header
		self.writer
			.seek(io::SeekFrom::Start(MAGIC.len() as u64))
			.context("Unable to seek to header")?;

		let header = Header {
			records: self.records_written,
			threads: self.threads_written,
		};
		header.to_writer(&mut self.writer).context("Unable to write header")?;
		self.writer.flush().context("Unable to flush writer")?;

		Ok(self.writer)
	}
}

/// Magic
pub const MAGIC: [u8; 8] = *b"NUMT v0\0";

/// Header
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Header {
	/// Total records
	pub records: u64,

	/// Thread start records
	pub threads: u64,
}

impl Header {
	/// Returns the size of this header (including any padding)
	pub const BYTE_SIZE: usize = 0x18;

	/// Parses a header from a reader
	pub fn from_reader<R: io::Read + io::Seek>(reader: &mut R) -> Result<Self, anyhow::Error> {
		let records = reader.read_u64::<LittleEndian>().context("Unable to read records")?;
		let threads = reader.read_u64::<LittleEndian>().context("Unable to read threads")?;

		// Then seek over the padding
		reader
			.seek(io::SeekFrom::Current(8))
			.context("Unable to seek over padding")?;

		Ok(Self { records, threads })
	}

	/// Writes a header to a writer
	pub fn to_writer<W: io::Write>(&self, writer: &mut W) -> Result<(), anyhow::Error> {
		writer
			.write_u64::<LittleEndian>(self.records)
			.context("Unable to write records")?;
		writer
			.write_u64::<LittleEndian>(self.threads)
			.context("Unable to write threads")?;
		writer.write_all(&[0; 8]).context("Unable to write padding")?;

		Ok(())
	}
}

/// Record
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Record {
	/// Memory access
	Access {
		/// Accessing thread
		thread: u32,

		/// Address
		addr: u64,

		/// Access kind
		kind: AccessKind,
	},

	/// Thread start
	ThreadStart {
		/// Started thread
		thread: u32,

		/// Os thread id
		os_tid: u64,
	},
}

impl Record {
	/// Returns the size of this record
	pub const BYTE_SIZE: usize = 0x10;

	/// Parses a record from a reader
	pub fn from_reader<R: io::Read>(reader: &mut R) -> Result<Self, anyhow::Error> {
		let data = reader.read_u64::<LittleEndian>().context("Unable to read data")?;
		let thread = reader.read_u32::<LittleEndian>().context("Unable to read thread")?;
		let kind = reader.read_u32::<LittleEndian>().context("Unable to read kind")?;

		let record = match kind {
			0 => Self::access(thread, data, AccessKind::Read),
			1 => Self::access(thread, data, AccessKind::Read2),
			2 => Self::access(thread, data, AccessKind::Write),
			3 => Self::ThreadStart { thread, os_tid: data },
			kind => anyhow::bail!("Unknown record kind: {kind}"),
		};

		Ok(record)
	}

	/// Writes a record to a writer
	pub fn to_writer<W: io::Write>(&self, writer: &mut W) -> Result<(), anyhow::Error> {
		let (data, thread, kind) = match *self {
			Self::Access { thread, addr, kind } => (addr, thread, match kind {
				AccessKind::Read => 0,
				AccessKind::Read2 => 1,
				AccessKind::Write => 2,
			}),
			Self::ThreadStart { thread, os_tid } => (os_tid, thread, 3),
		};

		writer
			.write_u64::<LittleEndian>(data)
			.context("Unable to write data")?;
		writer
			.write_u32::<LittleEndian>(thread)
			.context("Unable to write thread")?;
		writer
			.write_u32::<LittleEndian>(kind)
			.context("Unable to write kind")?;

		Ok(())
	}

	/// Creates an access record
	fn access(thread: u32, addr: u64, kind: AccessKind) -> Self {
		Self::Access { thread, addr, kind }
	}
}

/// Access kind
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum AccessKind {
	/// Read
	Read,

	/// Second read of an instruction with two memory reads
	Read2,

	/// Write
	Write,
}
