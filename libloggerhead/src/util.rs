/*
 * Created on Tue Feb 06 2024
 *
 * This file is a part of Loggerhead
 * Loggerhead is a free and open-source in-memory geospatial database that
 * aims to provide fast location writes, reads and range queries with
 * effortless horizontal scaling
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

pub mod terminal {
    //! The startup banner and the goodbye line are the only places the
    //! server talks to a human directly; everything else goes through the
    //! logger
    use std::fmt;
    use std::io::{self, Write};
    use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

    /// Print an informational message in the house colour. If the terminal
    /// won't take colour the message still goes out plain: the text matters,
    /// the paint doesn't
    pub fn write_info<T: fmt::Display>(item: T) -> io::Result<()> {
        let mut stdout = StandardStream::stdout(ColorChoice::Auto);
        let painted = stdout
            .set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))
            .is_ok();
        write!(&mut stdout, "{}", item)?;
        if painted {
            stdout.reset()?;
        }
        stdout.flush()
    }
}
