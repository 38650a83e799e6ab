use std::{
    fs::File,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    DefaultTerminal, Frame,
    buffer::Buffer,
    layout::{Alignment, Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Paragraph, Widget, Wrap},
};

use chip8_vm::{
    Chip8, Chip8Runner, Chip8RunnerResult, Config, DEFAULT_CYCLE_HZ, DISPLAY_X, DISPLAY_Y,
    KeyWaitPolicy,
    debugger::{Cli, Command, CommandResult, Executor},
    u4,
};

/// Terminal keys for CHIP-8 keys 0x0 through 0xF.
const KEY_MAP: [char; 16] = [
    'x', '1', '2', '3', 'q', 'w', 'e', 'a', 's', 'd', 'z', 'c', '4', 'r', 'f', 'v',
];

/// Keypad keys in their physical 4x4 arrangement.
const KEYPAD_ROWS: [[u8; 4]; 4] = [
    [0x1, 0x2, 0x3, 0xC],
    [0x4, 0x5, 0x6, 0xD],
    [0x7, 0x8, 0x9, 0xE],
    [0xA, 0x0, 0xB, 0xF],
];

// Most terminals never report key releases, so a key counts as released once
// no repeat arrived for this long.
const KEY_RELEASE_TIMEOUT: Duration = Duration::from_millis(50);

const FRAME_TIME: Duration = Duration::from_millis(16);

// Two display rows share one terminal cell using half blocks.
const DISPLAY_ROWS: u16 = (DISPLAY_Y / 2) as u16;
const CODE_WIDTH: u16 = 24;
const SIDE_WIDTH: u16 = 19;

/// Instructions shown above the program counter in the code panel.
const CODE_CONTEXT: u16 = 3;

struct App {
    executor: Executor,
    input: String,
    output: String,
    should_quit: bool,
    last_tick: Instant,
    /// Repeated when Enter is pressed on an empty line.
    last_command: Option<Command>,
    held_keys: [Option<Instant>; 16],
}

impl App {
    fn new(args: &Args, rom: Vec<u8>) -> anyhow::Result<Self> {
        let mut chip8 = Chip8::with_config(Config::default().with_key_wait(args.key_wait));
        chip8
            .load_program(&rom)
            .context("Failed to load ROM into CHIP-8 memory")?;
        let runner = Chip8Runner::with_cycle_hz(chip8, args.hz);
        let snapshot_path = args.rom_path.with_extension("c8ss");

        Ok(Self {
            executor: Executor::new(runner, rom, snapshot_path),
            input: String::new(),
            output: format!("Loaded {}", args.rom_path.display()),
            should_quit: false,
            last_tick: Instant::now(),
            last_command: None,
            held_keys: [None; 16],
        })
    }

    fn run(&mut self, terminal: &mut DefaultTerminal) -> anyhow::Result<()> {
        while !self.should_quit {
            let now = Instant::now();
            let dt = now.duration_since(self.last_tick).as_secs_f32();
            self.last_tick = now;

            if let Some(message) = self.poll_machine(dt) {
                self.output = message;
            }

            terminal.draw(|frame| self.draw(frame))?;

            self.release_stale_keys();

            if event::poll(FRAME_TIME)?
                && let Event::Key(key) = event::read()?
            {
                self.handle_key_event(key);
            }
        }

        Ok(())
    }

    /// Advances a running machine, returning a message when it stopped.
    fn poll_machine(&mut self, dt: f32) -> Option<String> {
        match self.executor.poll(dt) {
            Ok(Chip8RunnerResult::Ok) => None,
            Ok(Chip8RunnerResult::HitBreakpoint { pc }) => {
                Some(format!("Breakpoint hit at {pc:03X}"))
            }
            Ok(Chip8RunnerResult::UnknownInstruction { pc, opcode }) => {
                Some(format!("Skipped unknown word {opcode:04X} at {pc:03X}"))
            }
            Err(e) => Some(format!("Halted: {e}")),
        }
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn release_stale_keys(&mut self) {
        let now = Instant::now();

        for (key, held_since) in self.held_keys.iter_mut().enumerate() {
            if let Some(time) = *held_since
                && now.duration_since(time) > KEY_RELEASE_TIMEOUT
            {
                *held_since = None;
                self.executor
                    .runner_mut()
                    .set_key(u4::new(key as u8), false);
            }
        }
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        if self.executor.is_running() {
            self.handle_running_key(key.code);
        } else if key.kind == KeyEventKind::Press {
            self.handle_prompt_key(key.code);
        }
    }

    /// While running, keys drive the keypad and Escape drops back to the prompt.
    fn handle_running_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => {
                self.executor.pause();
                self.output = "Paused".to_string();
            }
            KeyCode::Char(c) => {
                if let Some(key) = KEY_MAP.iter().position(|&k| k == c.to_ascii_lowercase()) {
                    self.executor.runner_mut().set_key(u4::new(key as u8), true);
                    self.held_keys[key] = Some(Instant::now());
                }
            }
            _ => {}
        }
    }

    fn handle_prompt_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Enter => self.submit(),
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            _ => {}
        }
    }

    fn submit(&mut self) {
        let line = std::mem::take(&mut self.input);

        let command = if line.trim().is_empty() {
            self.last_command.clone()
        } else {
            match Cli::try_parse_from(line.split_whitespace()) {
                Ok(cli) => Some(cli.command),
                Err(e) => {
                    self.output = e.to_string();
                    self.last_command = None;
                    None
                }
            }
        };

        if let Some(command) = command {
            self.last_command = Some(command.clone());
            self.output = self.execute_command(command);
        }
    }

    fn execute_command(&mut self, command: Command) -> String {
        let result = match self.executor.execute(command) {
            Ok(result) => result,
            Err(e) => return format!("Error: {e}"),
        };

        match result {
            CommandResult::Ok => "OK".to_string(),
            CommandResult::Quit => {
                self.should_quit = true;
                String::new()
            }
            CommandResult::Breakpoints(breakpoints) if breakpoints.is_empty() => {
                "No breakpoints".to_string()
            }
            CommandResult::Breakpoints(breakpoints) => breakpoints
                .iter()
                .map(|addr| format!("{addr:03X}"))
                .collect::<Vec<_>>()
                .join(" "),
            CommandResult::MemDump { data, offset } => hex_dump(&data, offset),
            CommandResult::Disasm { instructions } => instructions
                .iter()
                .map(|(addr, word, opcode)| format!("{addr:03X}  {word:04X}  {opcode}"))
                .collect::<Vec<_>>()
                .join("\n"),
            CommandResult::Saved(path) => format!("Saved state to {}", path.display()),
            CommandResult::Loaded(path) => format!("Loaded state from {}", path.display()),
        }
    }
}

/// Sixteen bytes per line, each line prefixed with its address.
fn hex_dump(data: &[u8], offset: u16) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let bytes: Vec<String> = chunk.iter().map(|byte| format!("{byte:02X}")).collect();
            format!("{:03X}: {}", usize::from(offset) + row * 16, bytes.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        const MIN_WIDTH: u16 = DISPLAY_X as u16 + 2 + CODE_WIDTH + SIDE_WIDTH;
        const MIN_HEIGHT: u16 = DISPLAY_ROWS + 2 + 3 + 3;

        if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
            let [row] = Layout::vertical([Constraint::Length(3)])
                .flex(Flex::Center)
                .areas(area);

            Paragraph::new(format!("Need at least {MIN_WIDTH}x{MIN_HEIGHT} cells"))
                .style(Style::default().fg(Color::Red))
                .alignment(Alignment::Center)
                .block(Block::bordered())
                .render(row, buf);
            return;
        }

        let [main, code, side] = Layout::horizontal([
            Constraint::Min(DISPLAY_X as u16 + 2),
            Constraint::Length(CODE_WIDTH),
            Constraint::Length(SIDE_WIDTH),
        ])
        .areas(area);

        let [display, output, input] = Layout::vertical([
            Constraint::Length(DISPLAY_ROWS + 2),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .areas(main);

        let [registers, keypad, stack] = Layout::vertical([
            Constraint::Length(13 + 2),
            Constraint::Length(KEYPAD_ROWS.len() as u16 + 2),
            Constraint::Min(3),
        ])
        .areas(side);

        self.render_display(display, buf);
        self.render_output(output, buf);
        self.render_input(input, buf);
        self.render_code(code, buf);
        self.render_registers(registers, buf);
        self.render_keypad(keypad, buf);
        self.render_stack(stack, buf);
    }
}

impl App {
    fn render_display(&self, area: Rect, buf: &mut Buffer) {
        let display = &self.executor.state().display;
        let lit = Style::default().fg(Color::Green);

        let lines: Vec<Line> = display
            .chunks_exact(2)
            .map(|pair| {
                let cells: String = pair[0]
                    .iter()
                    .zip(pair[1].iter())
                    .map(|(&top, &bottom)| match (top, bottom) {
                        (true, true) => '█',
                        (true, false) => '▀',
                        (false, true) => '▄',
                        (false, false) => ' ',
                    })
                    .collect();
                Line::styled(cells, lit)
            })
            .collect();

        let title = if self.executor.is_running() {
            Line::styled(" Running ", Style::default().fg(Color::Green))
        } else {
            Line::styled(" Paused ", Style::default().fg(Color::Yellow))
        };

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(" Display ").title(title.right_aligned()))
            .render(area, buf);
    }

    /// Disassembly starting a few instructions before PC. The current
    /// instruction is highlighted and breakpoints are marked with `*`.
    fn render_code(&self, area: Rect, buf: &mut Buffer) {
        let pc = self.executor.state().pc;
        let rows = usize::from(area.height.saturating_sub(2));
        let start = pc.saturating_sub(CODE_CONTEXT * 2);
        let breakpoints = self.executor.breakpoints();

        let lines: Vec<Line> = self
            .executor
            .runner()
            .chip8_ref()
            .disassemble(start, rows)
            .into_iter()
            .map(|(addr, _, opcode)| {
                let marker = if breakpoints.contains(&addr) { '*' } else { ' ' };
                let text = format!("{marker}{addr:03X} {opcode}");
                if addr == pc {
                    Line::styled(text, Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    Line::from(text)
                }
            })
            .collect();

        Paragraph::new(lines)
            .block(Block::bordered().title(" Code "))
            .render(area, buf);
    }

    fn render_registers(&self, area: Rect, buf: &mut Buffer) {
        let state = self.executor.state();
        let wait = if state.is_awaiting_key() { "key" } else { "-" };

        let mut lines = vec![
            Line::from(format!("PC {:03X}   I {:03X}", state.pc, state.i)),
            Line::from(format!("DT {:02X}    ST {:02X}", state.delay_timer, state.sound_timer)),
            Line::from(format!("SP {:02}    W  {wait}", state.sp)),
            Line::from(""),
        ];
        lines.extend((0..8).map(|low| {
            let high = low + 8;
            Line::from(format!(
                "V{low:X} {:02X}    V{high:X} {:02X}",
                state.v[low], state.v[high]
            ))
        }));
        lines.push(Line::from(""));

        Paragraph::new(lines)
            .block(Block::bordered().title(" Registers "))
            .render(area, buf);
    }

    fn render_keypad(&self, area: Rect, buf: &mut Buffer) {
        let keypad = &self.executor.state().keypad;
        let pressed = Style::default().fg(Color::Black).bg(Color::White);

        let lines: Vec<Line> = KEYPAD_ROWS
            .iter()
            .map(|row| {
                let spans: Vec<Span> = row
                    .iter()
                    .map(|&key| {
                        let style = if keypad[usize::from(key)] {
                            pressed
                        } else {
                            Style::default()
                        };
                        Span::styled(format!(" {key:X} "), style)
                    })
                    .collect();
                Line::from(spans)
            })
            .collect();

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(" Keypad "))
            .render(area, buf);
    }

    /// Return addresses, innermost first.
    fn render_stack(&self, area: Rect, buf: &mut Buffer) {
        let stack = self.executor.state().call_stack();

        let lines: Vec<Line> = if stack.is_empty() {
            vec![Line::from("(empty)")]
        } else {
            stack
                .iter()
                .enumerate()
                .rev()
                .map(|(depth, addr)| Line::from(format!("{depth:02} {addr:03X}")))
                .collect()
        };

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(" Stack "))
            .render(area, buf);
    }

    fn render_output(&self, area: Rect, buf: &mut Buffer) {
        Paragraph::new(self.output.as_str())
            .wrap(Wrap { trim: false })
            .block(Block::bordered().title(" Output "))
            .render(area, buf);
    }

    fn render_input(&self, area: Rect, buf: &mut Buffer) {
        let prompt = if self.executor.is_running() {
            Line::styled("Esc to pause", Style::default().fg(Color::DarkGray))
        } else {
            Line::from(format!("> {}", self.input))
        };

        Paragraph::new(prompt)
            .block(Block::bordered().title(" Command "))
            .render(area, buf);
    }
}

/// Terminal debugger for CHIP-8 programs.
///
/// Commands: run, pause, step [n], b set|clear|list|clear-all <addr>,
/// set <reg> <value>, poke <addr> <byte>, mem [start] [len], disasm [start] [len],
/// save [path], load [path], reset, eject, quit. An empty line repeats the
/// previous command. While running, keys 1-4, Q-R, A-F, Z-V drive the keypad.
#[derive(Parser)]
struct Args {
    /// Path to the ROM file to load
    rom_path: PathBuf,

    /// Cycles per second; timers tick once per cycle
    #[arg(long, default_value_t = DEFAULT_CYCLE_HZ)]
    hz: f32,

    /// Behaviour of the Fx0A wait-for-key instruction
    #[arg(long, value_enum, default_value_t = KeyWaitPolicy::Edge)]
    key_wait: KeyWaitPolicy,

    /// Write log output to this file (filtered by RUST_LOG, default info).
    /// Without it nothing is logged, since stderr is hidden by the UI.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(path: &Path) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .context("Failed to install logger")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.log_file {
        init_logging(path)?;
    }

    let rom = std::fs::read(&args.rom_path)
        .with_context(|| format!("Failed to read ROM file {}", args.rom_path.display()))?;
    let mut app = App::new(&args, rom).context("Failed to initialize debugger")?;

    let mut terminal = ratatui::init();
    let result = app.run(&mut terminal);
    ratatui::restore();

    result
}
