//! GUI constructs defined by Write-To-Display structured fields
//!
//! Windows, scroll bars and selection fields (menu bars) are only modelled
//! at the wire level: enough state to redraw them through a terminal
//! callback, to hit-test the cursor against them and to re-encode them
//! when the screen is saved.

/// Selection field types
pub const MENU_TYPE_MENUBAR: u8 = 0x01;
pub const MENU_TYPE_SINGLE_SELECT_FIELD: u8 = 0x11;
pub const MENU_TYPE_MULTIPLE_SELECT_FIELD: u8 = 0x12;
pub const MENU_TYPE_SINGLE_SELECT_LIST: u8 = 0x21;
pub const MENU_TYPE_MULTIPLE_SELECT_LIST: u8 = 0x22;
pub const MENU_TYPE_SINGLE_SELECT_FIELD_PULL_DOWN: u8 = 0x31;
pub const MENU_TYPE_MULTIPLE_SELECT_FIELD_PULL_DOWN: u8 = 0x32;
pub const MENU_TYPE_PUSH_BUTTONS: u8 = 0x41;
pub const MENU_TYPE_PUSH_BUTTONS_PULL_DOWN: u8 = 0x51;

/// Border characters from the Create Window border minor structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowBorder {
    pub flags: u8,
    pub mono_attr: u8,
    pub color_attr: u8,
    /// Upper left, top, upper right, left, right, lower left, bottom, lower right
    pub chars: Vec<u8>,
}

/// A window created by the Create Window structured field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    pub id: usize,
    /// 1-based row of the top border
    pub row: usize,
    /// 1-based column of the left border
    pub column: usize,
    pub height: usize,
    pub width: usize,
    pub border: Option<WindowBorder>,
}

impl Window {
    pub fn new(row: usize, column: usize, height: usize, width: usize) -> Self {
        Self { id: 0, row, column, height, width, border: None }
    }

    /// True when the window's origin is at the 1-based (x, y)
    pub fn hit_test(&self, x: usize, y: usize) -> bool {
        self.column == x && self.row == y
    }

    /// Same origin and same size
    pub fn matches(&self, x: usize, y: usize, width: usize, height: usize) -> bool {
        self.hit_test(x, y) && self.width == width && self.height == height
    }
}

/// A scroll bar created by the Define Scroll Bar structured field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scrollbar {
    pub id: usize,
    /// 0 = vertical, 1 = horizontal
    pub direction: u8,
    /// Total rows or columns that can be scrolled
    pub rowscols: u32,
    pub sliderpos: u32,
    pub size: u8,
}

impl Scrollbar {
    pub fn is_horizontal(&self) -> bool {
        self.direction == 1
    }
}

/// One choice of a selection field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuItem {
    pub id: usize,
    pub flagbyte1: u8,
    pub flagbyte2: u8,
    pub flagbyte3: u8,
    /// Text length plus the two attribute positions
    pub size: usize,
    pub available: bool,
    pub selected: bool,
    /// Choice text, EBCDIC
    pub text: Vec<u8>,
    pub row: usize,
    pub column: usize,
}

impl MenuItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// (x, y) lies on this item's row within its text span
    pub fn hit_test(&self, x: usize, y: usize) -> bool {
        self.row == y && x >= self.column && x <= self.column + self.size
    }
}

/// A selection field (menu bar, choice list, push buttons)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Menubar {
    pub id: usize,
    pub flagbyte1: u8,
    pub flagbyte2: u8,
    pub flagbyte3: u8,
    pub restricted_cursor: bool,
    pub menu_type: u8,
    pub row: usize,
    pub column: usize,
    pub itemsize: usize,
    pub height: usize,
    pub items: usize,
    pub menuitems: Vec<MenuItem>,
}

impl Menubar {
    pub fn new() -> Self {
        Self::default()
    }

    /// The row y is covered by this selection field. Every selection
    /// field covers at least its own row.
    pub fn hit_test(&self, _x: usize, y: usize) -> bool {
        y >= self.row && y < self.row + self.height.max(1)
    }

    /// Append an item and place it according to the menu type: menu bar
    /// choices run left to right, every other type stacks them.
    pub fn add_item(&mut self, mut item: MenuItem) -> &MenuItem {
        item.id = self.menuitems.len();
        match self.menuitems.last() {
            None => {
                item.row = self.row;
                item.column = self.column + 1;
            }
            Some(prev) if self.menu_type == MENU_TYPE_MENUBAR => {
                item.row = prev.row;
                item.column = prev.column + prev.size + 1;
            }
            Some(prev) => {
                item.row = prev.row + 1;
                item.column = self.column + 1;
            }
        }
        self.menuitems.push(item);
        &self.menuitems[self.menuitems.len() - 1]
    }

    pub fn item_mut(&mut self, id: usize) -> Option<&mut MenuItem> {
        self.menuitems.iter_mut().find(|item| item.id == id)
    }

    fn item_at(&self, x: usize, y: usize) -> Option<usize> {
        self.menuitems.iter().position(|item| item.hit_test(x, y))
    }

    /// Move the selection to the item after the one at (x, y), wrapping.
    /// With no item under (x, y) the first item is selected. Returns the
    /// newly selected item's (row, column).
    pub fn select_next(&mut self, x: usize, y: usize) -> Option<(usize, usize)> {
        let count = self.menuitems.len();
        if count == 0 {
            return None;
        }
        let current = self.item_at(x, y).unwrap_or(count - 1);
        let next = (current + 1) % count;
        self.menuitems[current].selected = false;
        self.menuitems[next].selected = true;
        Some((self.menuitems[next].row, self.menuitems[next].column))
    }

    /// Move the selection to the item before the one at (x, y), wrapping.
    /// With no item under (x, y) the last item is selected.
    pub fn select_prev(&mut self, x: usize, y: usize) -> Option<(usize, usize)> {
        let count = self.menuitems.len();
        if count == 0 {
            return None;
        }
        let current = self.item_at(x, y).unwrap_or(0);
        let prev = (current + count - 1) % count;
        self.menuitems[current].selected = false;
        self.menuitems[prev].selected = true;
        Some((self.menuitems[prev].row, self.menuitems[prev].column))
    }

    pub fn selected(&self) -> Option<&MenuItem> {
        self.menuitems.iter().find(|item| item.selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &[u8]) -> MenuItem {
        MenuItem { size: text.len() + 2, text: text.to_vec(), available: true, ..MenuItem::new() }
    }

    fn menubar(menu_type: u8) -> Menubar {
        let mut bar = Menubar { menu_type, row: 0, column: 2, height: 1, ..Menubar::new() };
        bar.add_item(item(b"\xC6\x89\x93\x85")); // File
        bar.add_item(item(b"\xC5\x84\x89\xA3")); // Edit
        bar.add_item(item(b"\xC8\x85\x93\x97")); // Help
        bar
    }

    #[test]
    fn test_menubar_items_run_across() {
        let bar = menubar(MENU_TYPE_MENUBAR);
        let cols: Vec<usize> = bar.menuitems.iter().map(|i| i.column).collect();
        assert_eq!(cols, vec![3, 10, 17]);
        assert!(bar.menuitems.iter().all(|i| i.row == 0));
        assert_eq!(bar.menuitems[2].id, 2);
    }

    #[test]
    fn test_list_items_stack() {
        let mut bar = menubar(MENU_TYPE_SINGLE_SELECT_LIST);
        bar.height = 3;
        let rows: Vec<usize> = bar.menuitems.iter().map(|i| i.row).collect();
        assert_eq!(rows, vec![0, 1, 2]);
        assert!(bar.menuitems.iter().all(|i| i.column == 3));
        assert!(bar.hit_test(40, 2));
        assert!(!bar.hit_test(40, 3));
    }

    #[test]
    fn test_select_next_and_prev_wrap() {
        let mut bar = menubar(MENU_TYPE_MENUBAR);
        assert_eq!(bar.select_next(3, 0), Some((0, 10)));
        assert_eq!(bar.selected().map(|i| i.id), Some(1));
        assert_eq!(bar.select_next(17, 0), Some((0, 3)));
        assert_eq!(bar.select_prev(3, 0), Some((0, 17)));
        assert_eq!(bar.selected().map(|i| i.id), Some(2));

        // Nothing under the cursor: next starts from the first item
        assert_eq!(bar.select_next(60, 0), Some((0, 3)));
    }

    #[test]
    fn test_window_hit_test() {
        let window = Window::new(5, 10, 6, 30);
        assert!(window.hit_test(10, 5));
        assert!(!window.hit_test(11, 5));
        assert!(window.matches(10, 5, 30, 6));
        assert!(!window.matches(10, 5, 31, 6));
    }

    #[test]
    fn test_empty_menubar_selection() {
        let mut bar = Menubar::new();
        assert_eq!(bar.select_next(0, 0), None);
        assert_eq!(bar.select_prev(0, 0), None);
    }
}
